pub(crate) mod builtins;

use crate::agent::Agent;
use crate::event::{Event, HandlerSync};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Callback invoked when a command's keyword matches a line of text input.
/// Runs on the handler worker thread that is dispatching the text event.
pub type CommandFn = Arc<dyn Fn(&Agent, &ParamList, &HandlerSync) + Send + Sync>;

/// A named command: keyword (case-insensitive), help strings, the single-char
/// option flags it accepts, and the callback.
#[derive(Clone)]
pub struct Command {
    name: String,
    description: String,
    usage: String,
    options: String,
    callback: CommandFn,
}

impl Command {
    pub fn new(
        name: &str,
        description: &str,
        usage: &str,
        options: &str,
        callback: CommandFn,
    ) -> Self {
        Self {
            name: name.to_uppercase(),
            description: description.to_string(),
            usage: usage.to_string(),
            options: options.to_string(),
            callback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("options", &self.options)
            .finish()
    }
}

/// Parsed invocation: positional args plus the `-x` flags the command declares.
#[derive(Debug, Default)]
pub struct ParamList {
    args: Vec<String>,
    options: HashSet<char>,
}

impl ParamList {
    /// Split `tokens` into option flags (single-dash tokens whose chars are
    /// all declared in `declared`) and positional args (everything else).
    fn parse(tokens: &[&str], declared: &str) -> Self {
        let mut args = Vec::new();
        let mut options = HashSet::new();
        for tok in tokens {
            let flags = tok.strip_prefix('-');
            match flags {
                Some(f) if !f.is_empty() && f.chars().all(|c| declared.contains(c)) => {
                    options.extend(f.chars());
                }
                _ => args.push((*tok).to_string()),
            }
        }
        Self { args, options }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn has_option(&self, flag: char) -> bool {
        self.options.contains(&flag)
    }
}

/// Stores command definitions and looks them up by keyword.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Mutex<AHashMap<String, Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command; an existing definition under the same keyword is
    /// replaced with a warning.
    pub fn register(&self, command: Command) {
        let mut commands = self.commands.lock();
        if commands.insert(command.name.clone(), command.clone()).is_some() {
            tracing::warn!("command '{}' was already registered; replaced", command.name);
        }
    }

    /// Remove a command definition. No-op if absent.
    pub fn unregister(&self, name: &str) {
        self.commands.lock().remove(&name.to_uppercase());
    }

    pub fn lookup(&self, name: &str) -> Option<Command> {
        self.commands.lock().get(&name.to_uppercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Text-input dispatch: tokenize the line, match the first token against the
/// registry, and run the callback on this worker thread.
pub(crate) fn dispatch_text(agent: &Agent, event: &Event, sync: &HandlerSync) {
    let Some(line) = event.args_as::<String>() else {
        tracing::debug!("text input event without string payload; ignoring");
        return;
    };
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((keyword, rest)) = tokens.split_first() else {
        return;
    };

    match agent.shared().commands.lookup(keyword) {
        Some(command) => {
            tracing::debug!("running command {}", command.name());
            let params = ParamList::parse(rest, &command.options);
            (command.callback)(agent, &params, sync);
        }
        None => {
            agent.say(&format!(
                "Sorry, $USER_TITLE, I don't know how to {keyword}."
            ));
        }
    }
}
