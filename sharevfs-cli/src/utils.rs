use console::{measure_text_width, style};
use sharevfs::{Identity, Node, PermKind};

pub fn print_success(message: &str) {
    println!("{} {}", style("✅").green(), style(message).green());
}

pub fn print_error(message: &str) {
    println!("{} {}", style("❌").red(), style(message).red());
}

pub fn print_info(message: &str) {
    println!("{} {}", style("ℹ️").blue(), style(message).blue());
}

/// Binary units with one decimal, e.g. `1.5 KiB`. Bytes are shown exactly.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut unit = 0;
    let mut scaled = bytes;
    while scaled >= 1024 * 1024 && unit + 1 < UNITS.len() {
        scaled /= 1024;
        unit += 1;
    }
    let tenths = (scaled * 10 + 512) / 1024;
    format!("{}.{} {}", tenths / 10, tenths % 10, UNITS[unit])
}

/// Heading for a command acting on `url`, underlined to its own width.
pub fn print_banner(action: &str, url: &str, identity: Option<&Identity>) {
    let mut line = format!("{action} {url}");
    if let Some(identity) = identity {
        line.push_str(&format!(" ({})", describe_identity(identity)));
    }
    println!();
    println!("{}", style(&line).bold().cyan());
    println!("{}", style("─".repeat(measure_text_width(&line))).dim());
}

/// `✓`/`✗` for one permission of `node` as seen by `identity`.
pub fn mark(node: &Node, kind: PermKind, identity: &Identity) -> String {
    if node.can(kind, identity) {
        style("✓").green().to_string()
    } else {
        style("✗").red().to_string()
    }
}

pub fn describe_identity(identity: &Identity) -> String {
    match identity.account() {
        Some(account) => format!("as {account}"),
        None => "anonymously".to_string(),
    }
}
