//! Commands read from the interactive prompt.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use shared::{
    domain::DocumentId,
    route::{Route, View},
};

pub const HELP: &str = "\
commands:
  login <email> <password>     sign in
  signup <email> <password>    create an account and sign in
  logout                       sign out
  whoami                       show the active session
  profile <display name>       change the display name
  go <view> [document id]      navigate (auth, dashboard, upload, analysis, chat, profile)
  upload <path>                upload a document for analysis
  docs                         refresh and list documents
  analysis <document id>       show a document's analysis
  chat <document id> <text>    ask a question about a document
  render                       show the current view
  help                         this text
  quit                         exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: String, password: String },
    Signup { email: String, password: String },
    Logout,
    Whoami,
    Profile { display_name: String },
    Go(Route),
    Upload { path: PathBuf },
    Docs,
    Analysis { document_id: DocumentId },
    Chat { document_id: DocumentId, text: String },
    Render,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => {
            let (email, password) = credentials(rest, "login")?;
            Command::Login { email, password }
        }
        "signup" => {
            let (email, password) = credentials(rest, "signup")?;
            Command::Signup { email, password }
        }
        "logout" => Command::Logout,
        "whoami" => Command::Whoami,
        "profile" => Command::Profile {
            display_name: required(rest, "usage: profile <display name>")?.to_string(),
        },
        "go" => {
            let mut parts = rest.split_whitespace();
            let view: View = parts
                .next()
                .ok_or_else(|| anyhow!("usage: go <view> [document id]"))?
                .parse()?;
            Command::Go(Route::new(view, parts.next().map(DocumentId::from))?)
        }
        "upload" => Command::Upload {
            path: PathBuf::from(required(rest, "usage: upload <path>")?),
        },
        "docs" | "documents" => Command::Docs,
        "analysis" => Command::Analysis {
            document_id: DocumentId::from(required(rest, "usage: analysis <document id>")?),
        },
        "chat" => {
            let (document_id, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: chat <document id> <text>"))?;
            Command::Chat {
                document_id: DocumentId::from(document_id),
                text: text.trim().to_string(),
            }
        }
        "render" | "show" => Command::Render,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}', try 'help'"),
    };
    Ok(Some(command))
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str> {
    if rest.is_empty() {
        bail!("{usage}");
    }
    Ok(rest)
}

fn credentials(rest: &str, verb: &str) -> Result<(String, String)> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(email), Some(password), None) => Ok((email.to_string(), password.to_string())),
        _ => bail!("usage: {verb} <email> <password>"),
    }
}
