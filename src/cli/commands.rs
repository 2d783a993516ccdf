//! Parsing of the interactive commands recognised at the input prompt.

/// What a single input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Help,
    Save(Option<String>),
    Load(Option<LoadTarget>),
    ToggleAutoSave,
    Settings,
    SetEof(Option<String>),
    Tools,
    Shell(String),
    CodeBlocks(Option<usize>),
    Tables(Option<usize>),
    ToggleRecording,
    /// A command prefix with an argument it cannot use.
    Invalid(String),
    /// Ordinary prompt text for the input buffer.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    /// 1-based position in the history index listing.
    Entry(usize),
    Path(String),
}

pub struct CommandHelp {
    pub syntax: &'static str,
    pub help: &'static str,
}

pub const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        syntax: "exit",
        help: "Quit.",
    },
    CommandHelp {
        syntax: "/?",
        help: "Show this help.",
    },
    CommandHelp {
        syntax: "/save [NAME]",
        help: "Save the current chat (asks for a name when none is given).",
    },
    CommandHelp {
        syntax: "/load [N|PATH]",
        help: "List saved chats, or load entry N or a chat file.",
    },
    CommandHelp {
        syntax: "/auto",
        help: "Toggle auto-save to the last saved chat after every answer.",
    },
    CommandHelp {
        syntax: "/settings",
        help: "Show the config file path and content.",
    },
    CommandHelp {
        syntax: "/eof [MARKER]",
        help: "Change the marker that submits the input buffer.",
    },
    CommandHelp {
        syntax: "/tools",
        help: "List the tools offered by the running providers.",
    },
    CommandHelp {
        syntax: "!CMD",
        help: "Run a shell command (e.g. !ls).",
    },
    CommandHelp {
        syntax: ">> / >>N",
        help: "Show the code blocks of the last answer / show and copy block N.",
    },
    CommandHelp {
        syntax: "|| / ||N",
        help: "Show the tables of the last answer / show and copy table N.",
    },
];

pub fn help_text(eof_marker: &str, voice_trigger: &str) -> String {
    let mut text = String::from("Commands:\n");
    for command in COMMANDS {
        text.push_str(&format!("  {:<16} {}\n", command.syntax, command.help));
    }
    text.push_str(&format!(
        "  {:<16} {}\n",
        voice_trigger, "Toggle speech recording (needs a provider with start_recording)."
    ));
    text.push_str(&format!(
        "\nEnd your prompt with {eof_marker} to send it. Ctrl-C interrupts a running answer.\n"
    ));
    text
}

pub fn parse_input(line: &str, voice_trigger: &str) -> ReplCommand {
    let trimmed = line.trim();

    if !voice_trigger.is_empty() && trimmed == voice_trigger {
        return ReplCommand::ToggleRecording;
    }
    if let Some(command) = trimmed.strip_prefix('!') {
        return ReplCommand::Shell(command.trim().to_string());
    }
    if let Some(rest) = trimmed.strip_prefix(">>") {
        return parse_index(rest, ">>", ReplCommand::CodeBlocks);
    }
    if let Some(rest) = trimmed.strip_prefix("||") {
        return parse_index(rest, "||", ReplCommand::Tables);
    }

    let (name, args) = match trimmed.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (trimmed, ""),
    };
    let arg = (!args.is_empty()).then(|| args.to_string());

    match name.to_ascii_lowercase().as_str() {
        "exit" if arg.is_none() => ReplCommand::Exit,
        "/?" => ReplCommand::Help,
        "/save" => ReplCommand::Save(arg),
        "/load" => ReplCommand::Load(arg.map(|arg| match arg.parse::<usize>() {
            Ok(entry) => LoadTarget::Entry(entry),
            Err(_) => LoadTarget::Path(arg),
        })),
        "/auto" => ReplCommand::ToggleAutoSave,
        "/settings" => ReplCommand::Settings,
        "/eof" => ReplCommand::SetEof(arg),
        "/tools" => ReplCommand::Tools,
        _ => ReplCommand::Text(line.to_string()),
    }
}

fn parse_index(rest: &str, prefix: &str, build: fn(Option<usize>) -> ReplCommand) -> ReplCommand {
    let rest = rest.trim();
    if rest.is_empty() {
        return build(None);
    }
    match rest.parse::<usize>() {
        Ok(index) => build(Some(index)),
        Err(_) => ReplCommand::Invalid(format!("Invalid index for {prefix} command.")),
    }
}
