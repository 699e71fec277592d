use crate::executor::Operation;
use crate::inventory::FilterCriteria;
use chrono::{DateTime, Utc};
use colored::*;

/// One selection in the interactive menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    List,
    Search,
    ToggleSystem,
    ToggleUser,
    ToggleDisabled,
    ToggleUninstalled,
    ClearFilters,
    Apply(Operation),
    Reload,
    Quit,
}

pub struct Menu;

impl Menu {
    pub fn parse_index(input: &str) -> Option<usize> {
        let s = input.trim();
        if let Ok(n) = s.parse::<usize>() {
            if n > 0 {
                return Some(n);
            }
        }
        // full-width digits
        let clean: String = s
            .chars()
            .map(|c| match c {
                '０'..='９' => ((c as u32 - '０' as u32) + '0' as u32) as u8 as char,
                _ => c,
            })
            .filter(|c| c.is_ascii_digit())
            .collect();
        if let Ok(num) = clean.parse::<usize>() {
            if num > 0 {
                return Some(num);
            }
        }
        None
    }

    pub fn parse_choice(input: &str) -> Option<MenuChoice> {
        let choice = match input.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" | "exit" => MenuChoice::Quit,
            "r" | "reload" => MenuChoice::Reload,
            "l" | "list" => MenuChoice::List,
            "/" | "s" | "search" => MenuChoice::Search,
            "c" | "clear" => MenuChoice::ClearFilters,
            other => match Self::parse_index(other)? {
                1 => MenuChoice::List,
                2 => MenuChoice::Search,
                3 => MenuChoice::ToggleSystem,
                4 => MenuChoice::ToggleUser,
                5 => MenuChoice::ToggleDisabled,
                6 => MenuChoice::ToggleUninstalled,
                7 => MenuChoice::Apply(Operation::Disable),
                8 => MenuChoice::Apply(Operation::Enable),
                9 => MenuChoice::Apply(Operation::Uninstall),
                10 => MenuChoice::Apply(Operation::Restore),
                _ => return None,
            },
        };
        Some(choice)
    }

    pub fn render(
        device_name: &str,
        criteria: &FilterCriteria,
        visible: usize,
        loaded_at: DateTime<Utc>,
    ) {
        println!(
            "\n{} {} {}",
            "===".bright_cyan(),
            device_name.bright_white().bold(),
            "===".bright_cyan()
        );
        println!("  {}", Self::describe_filters(criteria).bright_black());
        println!(
            "  {} package(s) match, {}\n",
            visible,
            Self::loaded_label(loaded_at, Utc::now())
        );
        let flag = |on: bool| if on { "[x]" } else { "[ ]" };
        let items = [
            ("1", "List packages".to_string()),
            ("2", "Search".to_string()),
            ("3", format!("{} System apps only", flag(criteria.system_only()))),
            ("4", format!("{} User apps only", flag(criteria.user_only()))),
            ("5", format!("{} Disabled only", flag(criteria.disabled_only()))),
            ("6", format!("{} Uninstalled only", flag(criteria.uninstalled_only()))),
            ("7", "Disable a package".to_string()),
            ("8", "Enable a package".to_string()),
            ("9", "Uninstall a package".to_string()),
            ("10", "Restore a package".to_string()),
        ];
        for (k, label) in items {
            println!("  {}) {}", k.bright_cyan(), label);
        }
        println!("  {}) {}", "c".bright_cyan(), "Clear filters");
        println!("  {}) {}", "r".bright_cyan(), "Reload from device");
        println!("  {}) {}", "q".bright_red(), "Quit");
    }

    /// How long ago the package list was read from the device.
    pub fn loaded_label(loaded_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let secs = (now - loaded_at).num_seconds().max(0);
        match secs {
            0..=59 => format!("loaded {}s ago", secs),
            60..=3599 => format!("loaded {}m ago", secs / 60),
            _ => format!("loaded {}h ago", secs / 3600),
        }
    }

    pub fn describe_filters(criteria: &FilterCriteria) -> String {
        let mut parts = Vec::new();
        if !criteria.search_text().trim().is_empty() {
            parts.push(format!("search \"{}\"", criteria.search_text().trim()));
        }
        if criteria.system_only() {
            parts.push("system".to_string());
        }
        if criteria.user_only() {
            parts.push("user".to_string());
        }
        if criteria.disabled_only() {
            parts.push("disabled".to_string());
        }
        if criteria.uninstalled_only() {
            parts.push("uninstalled".to_string());
        }
        if parts.is_empty() {
            "filters: none".to_string()
        } else {
            format!("filters: {}", parts.join(", "))
        }
    }
}
