use crate::adb::Device;
use crate::inventory::AppRecord;
use crate::safety::SafetyTier;
use colored::*;
use std::io::{self, Write};

pub struct ConsoleUi;

impl ConsoleUi {
    pub fn write_banner() {
        println!("{}\n", "debloater".bright_cyan().bold());
    }

    /// Reads one trimmed line. EOF and read errors come back as `q` so loops
    /// driven by this input terminate.
    pub fn read_line() -> String {
        let mut buf = String::new();
        print!("> ");
        let _ = io::stdout().flush();
        match io::stdin().read_line(&mut buf) {
            Ok(0) | Err(_) => "q".to_string(),
            Ok(_) => buf.trim().to_string(),
        }
    }

    pub fn prompt(msg: &str) -> String {
        println!("{}", msg);
        Self::read_line()
    }

    pub fn confirm(msg: &str) -> bool {
        print!("{} [y/N] ", msg);
        let _ = io::stdout().flush();
        let mut buf = String::new();
        if io::stdin().read_line(&mut buf).is_err() {
            return false;
        }
        matches!(buf.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    pub fn info(msg: &str) {
        println!("{} {}", "[INFO]".bright_blue(), msg);
    }

    pub fn warn(msg: &str) {
        println!("{} {}", "[WARN]".bright_yellow(), msg);
    }

    pub fn error(msg: &str) {
        eprintln!("{} {}", "[ERROR]".bright_red().bold(), msg);
    }

    pub fn success(msg: &str) {
        println!("{} {}", "[OK]".bright_green(), msg);
    }

    pub fn render_device_table(devices: &[Device]) {
        if devices.is_empty() {
            Self::warn("No devices found");
            return;
        }
        let sep = "-".repeat(80);
        println!("{}", sep.bright_black());
        println!(
            "{:<4} {:<20} {:<30} {:<12} {:<10}",
            "#".bright_cyan(),
            "Serial".bright_cyan(),
            "Device".bright_cyan(),
            "Android".bright_cyan(),
            "State".bright_cyan()
        );
        println!("{}", sep.bright_black());
        for (idx, d) in devices.iter().enumerate() {
            let n = format!("{}", idx + 1).bright_white().bold();
            let s = d.serial.bright_white();
            let name = d.display_name().bright_green();
            let ver = d.android_version.as_deref().unwrap_or("Unknown").bright_yellow();
            let state = if d.is_authorized() {
                d.state.as_str().bright_green()
            } else {
                d.state.as_str().bright_red()
            };
            println!("{:<4} {:<20} {:<30} {:<12} {:<10}", n, s, name, ver, state);
        }
        println!("{}", sep.bright_black());
        println!();
    }

    pub fn render_app_table(apps: &[&AppRecord]) {
        if apps.is_empty() {
            Self::warn("No packages match");
            return;
        }
        let sep = "-".repeat(96);
        println!("{}", sep.bright_black());
        println!(
            "{:<5} {:<44} {:<28} {:<8} {:<10}",
            "#".bright_cyan(),
            "Package".bright_cyan(),
            "Name".bright_cyan(),
            "Safety".bright_cyan(),
            "Status".bright_cyan()
        );
        println!("{}", sep.bright_black());
        for (idx, app) in apps.iter().enumerate() {
            Self::render_app_row(idx + 1, app);
        }
        println!("{}", sep.bright_black());
        println!("{} package(s)", apps.len());
    }

    pub fn render_app_row(index: usize, app: &AppRecord) {
        let n = format!("{}", index).bright_white().bold();
        let kind = if app.is_system_app { "" } else { " (user)" };
        let name = format!("{}{}", truncate(&app.display_name, 20), kind);
        println!(
            "{:<5} {:<44} {:<28} {:<8} {:<10}",
            n,
            truncate(&app.package_id, 44),
            name,
            Self::tier_label(app.safety_tier),
            Self::status_label(app)
        );
    }

    fn tier_label(tier: SafetyTier) -> ColoredString {
        match tier {
            SafetyTier::Safe => tier.label().bright_green(),
            SafetyTier::Caution => tier.label().bright_yellow(),
            SafetyTier::Risky => tier.label().bright_red().bold(),
        }
    }

    fn status_label(app: &AppRecord) -> ColoredString {
        if !app.is_installed_for_user {
            "removed".bright_black()
        } else if app.is_disabled {
            "disabled".yellow()
        } else {
            "enabled".green()
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}
