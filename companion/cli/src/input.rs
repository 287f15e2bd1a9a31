//! Interactive line parsing
//!
//! A line that does not start with `/` is a message. Slash commands map to
//! adapter intents; each surface ignores the ones it has no use for.

/// One parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Send a message
    Say(String),
    /// Send a message on behalf of someone else (`/as <name> <text>`)
    SayAs {
        /// Who is speaking
        speaker: String,
        /// Message body
        body: String,
    },
    /// `/edit <id> <text>`
    Edit {
        /// Server id of the message
        id: String,
        /// New body
        body: String,
    },
    /// `/retry <temp-id>`
    Retry(String),
    /// `/reload`
    Reload,
    /// `/list`
    List,
    /// `/new`
    New,
    /// `/select <id>`
    Select(String),
    /// `/delete <id>`
    Delete(String),
    /// `/rename <id> <title>`
    Rename {
        /// Conversation id
        id: String,
        /// New title
        title: String,
    },
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Blank line
    Empty,
    /// Malformed command, with a usage hint
    Invalid(&'static str),
}

/// Help text for the interactive prompt
pub const HELP: &str = "\
commands:
  <text>                 send a message
  /as <name> <text>      send on behalf of someone (assistant)
  /edit <id> <text>      edit a sent message (family)
  /retry <temp-id>       re-send a failed message
  /reload                reload history (family)
  /list                  refresh conversations (assistant)
  /new                   start a conversation (assistant)
  /select <id>           switch conversation (assistant)
  /delete <id>           delete a conversation (assistant)
  /rename <id> <title>   rename a conversation (assistant)
  /quit                  leave";

fn split_first(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.trim();
    let (head, tail) = rest.split_once(char::is_whitespace)?;
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some((head, tail))
    }
}

fn single(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty() && !rest.contains(char::is_whitespace)).then(|| rest.to_string())
}

/// Parse one line typed at the prompt
pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));

    match name {
        "quit" | "q" => Input::Quit,
        "help" | "h" => Input::Help,
        "reload" => Input::Reload,
        "list" => Input::List,
        "new" => Input::New,
        "as" => split_first(rest).map_or(Input::Invalid("/as <name> <text>"), |(s, b)| {
            Input::SayAs {
                speaker: s.to_string(),
                body: b.to_string(),
            }
        }),
        "edit" => split_first(rest).map_or(Input::Invalid("/edit <id> <text>"), |(id, b)| {
            Input::Edit {
                id: id.to_string(),
                body: b.to_string(),
            }
        }),
        "rename" => split_first(rest).map_or(Input::Invalid("/rename <id> <title>"), |(id, t)| {
            Input::Rename {
                id: id.to_string(),
                title: t.to_string(),
            }
        }),
        "retry" => single(rest).map_or(Input::Invalid("/retry <temp-id>"), Input::Retry),
        "select" => single(rest).map_or(Input::Invalid("/select <id>"), Input::Select),
        "delete" => single(rest).map_or(Input::Invalid("/delete <id>"), Input::Delete),
        _ => Input::Invalid("unknown command, try /help"),
    }
}
