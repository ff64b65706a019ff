use sharevfs::{NodePatch, NodeStore, PermKind, Perms, Who};

use crate::error::{Result, SharevfsCliError};
use crate::utils;

pub fn parse_kind(s: &str) -> Result<PermKind> {
    let name = s.strip_prefix("can_").unwrap_or(s);
    PermKind::ALL
        .into_iter()
        .find(|k| k.as_str().strip_prefix("can_") == Some(name))
        .ok_or_else(|| SharevfsCliError::Input(format!("unknown permission {s:?}")))
}

/// `None` means "inherit from the parent".
pub fn parse_who(s: &str) -> Result<Option<Who>> {
    let who = match s {
        "inherit" => return Ok(None),
        "anyone" | "true" => Who::Anyone,
        "nobody" | "none" | "false" => Who::NoOne,
        "accounts" | "*" => Who::AnyAccount,
        list => {
            let names: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                return Err(SharevfsCliError::Input(format!("no accounts in {s:?}")));
            }
            Who::AccountList(names)
        }
    };
    Ok(Some(who))
}

fn patch(kind: PermKind, who: Option<Who>) -> NodePatch {
    let mut perms = Perms::default();
    perms.set(kind, who);
    NodePatch {
        perms,
        ..Default::default()
    }
}

pub async fn execute(store: &NodeStore, path: &str, permission: &str, who: &str) -> Result<()> {
    let kind = parse_kind(permission)?;
    match parse_who(who)? {
        Some(who) => store.update_node(path, patch(kind, Some(who))).await?,
        None => store.clear_permission(path, kind).await?,
    }
    utils::print_success(&format!("{} on {path} set to {who}", kind.as_str()));
    Ok(())
}

pub async fn mask(
    store: &NodeStore,
    path: &str,
    pattern: &str,
    permission: Option<String>,
    who: Option<String>,
    remove: bool,
) -> Result<()> {
    if remove {
        store.set_mask(path, pattern, None).await?;
        utils::print_success(&format!("Removed mask {pattern} from {path}"));
        return Ok(());
    }

    let (Some(permission), Some(who)) = (permission, who) else {
        return Err(SharevfsCliError::Input(
            "a mask needs a permission and a value".to_string(),
        ));
    };
    let kind = parse_kind(&permission)?;
    let who = parse_who(&who)?
        .ok_or_else(|| SharevfsCliError::Input("a mask cannot inherit".to_string()))?;
    store.set_mask(path, pattern, Some(patch(kind, Some(who)))).await?;
    utils::print_success(&format!("Mask {pattern} on {path} now sets {}", kind.as_str()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("read").unwrap(), PermKind::Read);
        assert_eq!(parse_kind("can_archive").unwrap(), PermKind::Archive);
        assert!(parse_kind("write").is_err());
    }

    #[test]
    fn test_parse_who() {
        assert_eq!(parse_who("inherit").unwrap(), None);
        assert_eq!(parse_who("anyone").unwrap(), Some(Who::Anyone));
        assert_eq!(parse_who("*").unwrap(), Some(Who::AnyAccount));
        assert_eq!(
            parse_who("alice, staff").unwrap(),
            Some(Who::AccountList(vec!["alice".into(), "staff".into()]))
        );
        assert!(parse_who(",").is_err());
    }
}
