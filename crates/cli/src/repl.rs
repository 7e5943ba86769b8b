//! Interactive chat session
//!
//! Every turn is sent with the same conversation id so the engine can feed
//! earlier turns back into the prompt.

use anyhow::Result;
use colored::Colorize;
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor};
use strata::{Engine, ModeSelection};
use uuid::Uuid;

use crate::{commands::build_request, output::OutputHandler};

pub struct ChatRepl<'a> {
    engine: &'a Engine,
    output: OutputHandler,
    editor: Editor<(), DefaultHistory>,
    conversation_id: String,
    mode: Option<String>,
    turns: usize,
    total_tokens: u64,
}

impl<'a> ChatRepl<'a> {
    pub fn new(engine: &'a Engine, mode: Option<String>) -> Result<Self> {
        Ok(Self {
            engine,
            output: OutputHandler::new(true, true),
            editor: Editor::new()?,
            conversation_id: Uuid::new_v4().to_string(),
            mode,
            turns: 0,
            total_tokens: 0,
        })
    }

    /// Run the interactive loop until `/exit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        self.output
            .print_banner(&self.conversation_id, self.mode.as_deref());

        loop {
            let prompt = self.build_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let input = line.trim();

                    if input.is_empty() {
                        continue;
                    }

                    let _ = self.editor.add_history_entry(input);

                    if input.starts_with('/') {
                        if self.handle_command(input) {
                            break;
                        }
                    } else {
                        self.process_input(input).await;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!();
                    self.output.print_info("Use /exit to quit.");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    self.output.print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        self.output.print_info(&format!(
            "Session ended after {} turns.",
            self.turns
        ));
        Ok(())
    }

    fn build_prompt(&self) -> String {
        let mode_part = self
            .mode
            .as_deref()
            .map(|m| format!("{}", m.bright_cyan()))
            .unwrap_or_else(|| "auto".dimmed().to_string());

        format!(
            "\n{} [{} {} tokens] {} ",
            "strata".bright_green().bold(),
            mode_part,
            crate::output::format_num(self.total_tokens).bright_yellow(),
            ">".bright_green()
        )
    }

    /// Returns true when the session should end
    fn handle_command(&mut self, input: &str) -> bool {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or_default();

        match command {
            "/exit" | "/quit" | "/q" => return true,
            "/help" | "/h" | "/?" => self.print_help(),
            "/mode" => match parts.get(1) {
                Some(&"auto") | None => {
                    self.mode = None;
                    self.output.print_success("Mode: auto");
                }
                Some(name) => {
                    if self.engine.router().registry().get(name).is_some() {
                        self.mode = Some((*name).to_string());
                        self.output.print_success(&format!("Mode: {}", name));
                    } else {
                        self.output
                            .print_warning(&format!("Unknown mode '{}'. See /modes.", name));
                    }
                }
            },
            "/modes" => {
                let registry = self.engine.router().registry();
                self.output
                    .print_modes_table(registry.modes(), registry.default_mode().name());
            }
            "/route" => {
                let query = parts[1..].join(" ");
                self.output
                    .print_routing(&self.engine.route(&query, &ModeSelection::Auto));
            }
            "/new" => {
                self.conversation_id = Uuid::new_v4().to_string();
                self.turns = 0;
                self.output.print_success("Started a new conversation");
            }
            other => {
                self.output
                    .print_warning(&format!("Unknown command '{}'. Type /help.", other));
            }
        }
        false
    }

    async fn process_input(&mut self, input: &str) {
        let request = build_request(input, self.mode.as_deref(), Some(&self.conversation_id));
        let response = self.engine.process(request).await;

        self.total_tokens += response.input_tokens + response.output_tokens;
        if response.is_success() {
            self.turns += 1;
        }
        self.output.print_outcome(&response);
    }

    fn print_help(&self) {
        self.output.print_header("Commands");
        let commands = [
            ("/mode <name|auto>", "Force a processing mode or go back to routing"),
            ("/modes", "List processing modes"),
            ("/route <query>", "Show how a query would be routed"),
            ("/new", "Start a new conversation"),
            ("/exit", "Leave the session"),
        ];
        for (name, description) in commands {
            println!("  {:<20} {}", name.bright_white(), description.dimmed());
        }
    }
}
