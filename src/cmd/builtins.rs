//! Commands the engine registers on every agent: `TIMER` schedules a text
//! command for later execution, `DELTIMER` cancels one, `HELP` describes
//! whatever is currently registered.

use super::{Command, ParamList};
use crate::agent::Agent;
use crate::event::Topic;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn commands() -> Vec<Command> {
    vec![
        Command::new(
            "TIMER",
            "It schedules a command to execute in the future",
            "time-ms command",
            "r",
            Arc::new(|agent, params, _sync| cmd_timer(agent, params)),
        ),
        Command::new(
            "DELTIMER",
            "It deletes a timer",
            "timer-id",
            "",
            Arc::new(|agent, params, _sync| cmd_deltimer(agent, params)),
        ),
        Command::new(
            "HELP",
            "It prints available commands and how to use them",
            "[command]",
            "",
            Arc::new(|agent, params, _sync| cmd_help(agent, params)),
        ),
    ]
}

fn cmd_timer(agent: &Agent, params: &ParamList) {
    let recurring = params.has_option('r');
    if params.arg_count() < 2 {
        agent.say("You gotta give me a time and a command to execute, $USER_TITLE.");
        return;
    }
    let first = params.arg(0).unwrap_or_default();
    let period_ms: u64 = match first.parse() {
        Ok(ms) => ms,
        Err(_) => {
            agent.say(&format!(
                "Sorry, $USER_TITLE, but '{first}' isn't a number of milliseconds."
            ));
            return;
        }
    };
    let cmd_str = params.args()[1..].join(" ");

    let period = Duration::from_millis(period_ms);
    let id = if recurring {
        agent.add_timer(period, Topic::TextInput, cmd_str)
    } else {
        agent.delay(period, Topic::TextInput, cmd_str)
    };

    let plural = if period_ms != 1 { "s" } else { "" };
    let kind = if recurring { "every" } else { "in" };
    agent.say(&format!(
        "Okay, $USER_TITLE, I will do that {kind} {period_ms} millisecond{plural}!"
    ));
    agent.say(&format!("The timer ID is {id}."));
}

fn cmd_help(agent: &Agent, params: &ParamList) {
    match params.arg(0) {
        None => {
            for name in agent.shared().commands.names() {
                if let Some(command) = agent.shared().commands.lookup(&name) {
                    agent.say(&format!("{name}: {}", command.description()));
                }
            }
        }
        Some(name) => match agent.shared().commands.lookup(name) {
            Some(command) => {
                agent.say(&format!(
                    "{}: {} Usage: {} {}",
                    command.name(),
                    command.description(),
                    command.name(),
                    command.usage()
                ));
            }
            None => {
                agent.say(&format!(
                    "Sorry, $USER_TITLE, I don't have a command called {name}."
                ));
            }
        },
    }
}

fn cmd_deltimer(agent: &Agent, params: &ParamList) {
    let Some(first) = params.arg(0) else {
        agent.say("Ahh... $USER_TITLE, I need to know which timer I should delete.");
        return;
    };
    let id: i16 = match first.parse() {
        Ok(id) => id,
        Err(_) => {
            agent.say(&format!(
                "Sorry, $USER_TITLE, but '{first}' isn't an integer."
            ));
            return;
        }
    };
    match agent.remove_timer(id) {
        Ok(()) => agent.say(&format!(
            "Okay! I stopped timer {id} for you, $USER_TITLE."
        )),
        Err(e) => agent.say(&format!("Oh no, $USER_TITLE: {e}.")),
    }
}
