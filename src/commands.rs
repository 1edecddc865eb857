//! Available commands, shell parsing and autocomplete logic

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::portal::types::{BookingStatus, GdprRequestKind, ReviewDecision};

/// One portal action, run once from the command line or repeatedly in the shell.
#[derive(Debug, Clone, Subcommand)]
pub enum Action {
  /// Sign in and remember the session token
  Login {
    email: String,
    /// Password (default: $CAREPULSE_PASSWORD)
    #[arg(long)]
    password: Option<String>,
  },
  /// Sign out and forget the session token
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Admin dashboard counters
  Stats,
  /// Dashboard summary: stats, lab imports and compliance loaded together
  Dashboard,
  /// List bookings
  Bookings {
    #[arg(long, value_enum)]
    status: Option<BookingStatus>,
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  /// Change a booking's status
  SetStatus {
    id: i64,
    #[arg(value_enum)]
    status: BookingStatus,
  },
  /// Page view trends for a date range (YYYY-MM-DD)
  Trends {
    #[arg(long)]
    from: NaiveDate,
    #[arg(long)]
    to: NaiveDate,
  },
  /// CRM synchronization history
  Crm,
  /// Trigger a CRM synchronization run
  Sync,
  /// Audit log
  Audit {
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  /// GDPR requests
  Gdpr,
  /// File a GDPR request
  GdprRequest {
    #[arg(value_enum)]
    kind: GdprRequestKind,
  },
  /// Lab data imports awaiting review
  Labs,
  /// Approve or reject a lab import
  Review {
    id: i64,
    #[arg(value_enum)]
    decision: ReviewDecision,
    #[arg(long)]
    notes: Option<String>,
  },
  /// Biomarkers for a patient
  Biomarkers { patient_id: i64 },
  /// Compliance overview
  Compliance,
  /// GET any endpoint; extra parts are appended to the cache key
  Get { endpoint: String, parts: Vec<String> },
  /// Send any write; --invalidates may repeat
  Send {
    method: String,
    endpoint: String,
    /// JSON request body
    #[arg(long)]
    json: Option<String>,
    /// Endpoint prefix whose cached queries the write makes stale
    #[arg(long)]
    invalidates: Vec<String>,
  },
  /// Drop cached queries under a key prefix
  Invalidate { endpoint: String, parts: Vec<String> },
  /// List cached query keys
  Cache,
  /// Interactive shell sharing one query cache across commands
  Shell,
  /// Leave the shell
  Quit,
}

/// Parser for one shell line (no binary name).
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ShellLine {
  #[command(subcommand)]
  action: Action,
}

/// Parse a shell line, expanding command aliases and unambiguous prefixes.
pub fn parse_shell_line(line: &str) -> Result<Action, String> {
  let mut words: Vec<String> = line.split_whitespace().map(String::from).collect();
  let Some(first) = words.first_mut() else {
    return Err("empty command".to_string());
  };

  match get_suggestions(first).first() {
    Some(cmd) => *first = cmd.name.to_string(),
    None => return Err(format!("unknown command '{}'", first)),
  }

  ShellLine::try_parse_from(words)
    .map(|l| l.action)
    .map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// Shell commands; names match the `Action` subcommands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "stats",
    aliases: &["s"],
    description: "Admin dashboard counters",
  },
  Command {
    name: "dashboard",
    aliases: &["d", "home"],
    description: "Dashboard summary",
  },
  Command {
    name: "bookings",
    aliases: &["b", "booking"],
    description: "List bookings",
  },
  Command {
    name: "set-status",
    aliases: &["status"],
    description: "Change a booking's status",
  },
  Command {
    name: "trends",
    aliases: &["t", "analytics"],
    description: "Page view trends",
  },
  Command {
    name: "crm",
    aliases: &["history"],
    description: "CRM sync history",
  },
  Command {
    name: "sync",
    aliases: &["crm-sync"],
    description: "Trigger a CRM sync",
  },
  Command {
    name: "audit",
    aliases: &["a", "logs"],
    description: "Audit log",
  },
  Command {
    name: "gdpr",
    aliases: &["g"],
    description: "GDPR requests",
  },
  Command {
    name: "gdpr-request",
    aliases: &["request"],
    description: "File a GDPR request",
  },
  Command {
    name: "labs",
    aliases: &["l", "imports"],
    description: "Lab data imports",
  },
  Command {
    name: "review",
    aliases: &["r"],
    description: "Approve or reject a lab import",
  },
  Command {
    name: "biomarkers",
    aliases: &["bio"],
    description: "Patient biomarkers",
  },
  Command {
    name: "compliance",
    aliases: &["c"],
    description: "Compliance overview",
  },
  Command {
    name: "get",
    aliases: &["fetch"],
    description: "GET any endpoint",
  },
  Command {
    name: "send",
    aliases: &["write"],
    description: "Send any write",
  },
  Command {
    name: "invalidate",
    aliases: &["inv"],
    description: "Drop cached queries under a prefix",
  },
  Command {
    name: "cache",
    aliases: &["keys"],
    description: "List cached query keys",
  },
  Command {
    name: "login",
    aliases: &["signin"],
    description: "Sign in",
  },
  Command {
    name: "logout",
    aliases: &["signout"],
    description: "Sign out",
  },
  Command {
    name: "whoami",
    aliases: &["me"],
    description: "Show the signed-in user",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Leave the shell",
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  // Sort by priority; stable, so table order breaks ties
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}
