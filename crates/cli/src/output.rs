//! Output formatting and terminal rendering
//!
//! Handles rich terminal output with colors, markdown rendering, and the usage bar.

use colored::Colorize;
use strata::{LifecycleEvent, ProcessingMode, Response, RoutingDecision};

/// Format a number with thousand separators
pub fn format_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result
}

/// Output handler for terminal display
pub struct OutputHandler {
    pub show_usage_bar: bool,
    pub markdown_enabled: bool,
}

impl OutputHandler {
    pub fn new(show_usage_bar: bool, markdown_enabled: bool) -> Self {
        Self {
            show_usage_bar,
            markdown_enabled,
        }
    }

    /// Print the chat welcome banner
    pub fn print_banner(&self, conversation_id: &str, mode: Option<&str>) {
        println!();
        println!(
            "{}",
            "╔═══════════════════════════════════════════════════════════════╗".bright_cyan()
        );
        println!(
            "{}",
            "║                     Strata Chat Session                       ║".bright_cyan()
        );
        println!(
            "{}",
            "╠═══════════════════════════════════════════════════════════════╣".bright_cyan()
        );
        println!(
            "{}  Conversation: {:<47}{}",
            "║".bright_cyan(),
            &conversation_id[..8.min(conversation_id.len())].dimmed(),
            "║".bright_cyan()
        );
        println!(
            "{}  Mode: {:<55}{}",
            "║".bright_cyan(),
            mode.unwrap_or("auto").bright_white(),
            "║".bright_cyan()
        );
        println!(
            "{}  {}                               {}",
            "║".bright_cyan(),
            "Type your question or use /help for commands".dimmed(),
            "║".bright_cyan()
        );
        println!(
            "{}",
            "╚═══════════════════════════════════════════════════════════════╝".bright_cyan()
        );
        println!();
    }

    /// Print a section header
    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        println!("{}", "─".repeat(60).dimmed());
    }

    /// Print a success message
    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    /// Print an error message
    pub fn print_error(&self, text: &str) {
        println!("{} {}", "✗".bright_red(), text.bright_red());
    }

    /// Print a warning message
    pub fn print_warning(&self, text: &str) {
        println!("{} {}", "⚠".bright_yellow(), text.yellow());
    }

    /// Print an info message
    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    /// Print one lifecycle event as a status line
    pub fn print_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Start { mode, tier, .. } => {
                println!(
                    "{} {} {}",
                    "start".bright_blue(),
                    mode.bright_white(),
                    format!("({})", tier).dimmed()
                );
            }
            LifecycleEvent::Progress { stage, message, .. } => {
                println!("{} {} {}", "progress".cyan(), format!("[{}]", stage).dimmed(), message);
            }
            LifecycleEvent::Token { text, .. } => {
                println!("{} {} chars", "token".dimmed(), text.chars().count());
            }
            LifecycleEvent::Result { .. } => {
                println!("{}", "result".bright_green());
            }
            LifecycleEvent::Error {
                category, message, ..
            } => {
                println!(
                    "{} {} {}",
                    "error".bright_red(),
                    format!("[{}]", category).red(),
                    message
                );
            }
            LifecycleEvent::End { elapsed_ms, .. } => {
                println!("{} {} ms", "end".bright_blue(), elapsed_ms);
            }
        }
    }

    /// Print the result or failure of a request, then the usage bar
    pub fn print_outcome(&self, response: &Response) {
        if response.is_success() {
            self.print_response(&response.result);
            if let Some(dir) = &response.report_dir {
                println!();
                self.print_success(&format!("Report saved to {}", dir.display()));
            }
        } else {
            println!();
            self.print_error(&response.result);
            for record in &response.errors {
                println!(
                    "  {} attempt {} in {}: {}",
                    format!("[{}]", record.category).red(),
                    record.attempt + 1,
                    record.step.bright_white(),
                    record.message.dimmed()
                );
            }
        }
        self.print_usage_bar(response);
    }

    /// Print mode, tokens and cost of a request
    pub fn print_usage_bar(&self, response: &Response) {
        if !self.show_usage_bar {
            return;
        }

        println!();
        println!(
            "{}",
            "───────────────────────────────────────────────────────────────".dimmed()
        );
        println!(
            "  {} {} ({}) | {} {} in / {} out | {} ${:.4} | {} ms{}",
            "Mode:".dimmed(),
            response.mode.bright_white(),
            response.tier,
            "Tokens:".dimmed(),
            format_num(response.input_tokens).bright_white(),
            format_num(response.output_tokens).bright_white(),
            "Cost:".dimmed(),
            response.cost_usd,
            response.elapsed_ms,
            if response.cached {
                format!(" | {}", "cached".bright_green())
            } else {
                String::new()
            }
        );
    }

    /// Print assistant response (with optional markdown rendering)
    pub fn print_response(&self, content: &str) {
        println!();

        if self.markdown_enabled {
            for line in content.lines() {
                println!("{}", self.render_markdown_line(line));
            }
        } else {
            println!("{}", content);
        }
    }

    /// Print a routing decision
    pub fn print_routing(&self, decision: &RoutingDecision) {
        let mode = decision.mode();
        println!(
            "  {} {} {}",
            "Mode:".dimmed(),
            mode.name().bright_white().bold(),
            format!("({}, {:?})", mode.tier(), mode.runtime()).dimmed()
        );
        println!(
            "  {} {:.2}",
            "Confidence:".dimmed(),
            decision.confidence()
        );
        if let Some(complexity) = decision.complexity() {
            let signals = &complexity.signals;
            println!(
                "  {} {:.2} {}",
                "Complexity:".dimmed(),
                complexity.score,
                format!(
                    "({} chars, {} questions, {} multi-step markers, {} tool keywords)",
                    signals.length_chars,
                    signals.question_count,
                    signals.multi_step_markers,
                    signals.tool_keywords
                )
                .dimmed()
            );
        }
        if !decision.tool_hints().is_empty() {
            let hints: Vec<String> = decision
                .tool_hints()
                .iter()
                .map(|h| format!("{:?}", h))
                .collect();
            println!("  {} {}", "Tools:".dimmed(), hints.join(", ").bright_cyan());
        }
        for reason in decision.reasons() {
            println!("  {} {}", "•".bright_cyan(), reason);
        }
        println!();
    }

    /// Print the mode registry as a table
    pub fn print_modes_table<'a>(
        &self,
        modes: impl Iterator<Item = &'a ProcessingMode>,
        default_mode: &str,
    ) {
        println!();
        println!(
            "{}",
            format!("{:<20} {:<12} {:<10} {}", "Name", "Tier", "Runtime", "Description")
                .bright_white()
                .bold()
        );
        println!("{}", "─".repeat(90).dimmed());

        for mode in modes {
            let tier = mode.tier().to_string();
            let tier_colored = match tier.as_str() {
                "fast" => tier.bright_green(),
                "analytical" => tier.bright_yellow(),
                "agentic" => tier.bright_magenta(),
                _ => tier.normal(),
            };
            let name = if mode.name() == default_mode {
                format!("{} *", mode.name())
            } else {
                mode.name().to_string()
            };
            let runtime = format!("{:?}", mode.runtime()).to_lowercase();

            println!(
                "{:<20} {:<12} {:<10} {}",
                name.bright_white(),
                tier_colored,
                runtime.dimmed(),
                mode.description()
            );
        }
        println!();
        println!("  {}", "* default when no mode matches".dimmed());
    }

    // ============ Helper Methods ============

    fn render_markdown_line(&self, line: &str) -> String {
        if let Some(rest) = line.strip_prefix("### ") {
            return format!("{}", rest.bright_yellow().bold());
        }
        if let Some(rest) = line.strip_prefix("## ") {
            return format!("{}", rest.bright_cyan().bold());
        }
        if let Some(rest) = line.strip_prefix("# ") {
            return format!("{}", rest.bright_white().bold().underline());
        }

        if line.starts_with("```") {
            return format!("{}", line.dimmed());
        }

        // Inline code
        let mut result = line.to_string();
        while let Some(start) = result.find('`') {
            if let Some(end) = result[start + 1..].find('`') {
                let code = &result[start + 1..start + 1 + end];
                result = format!(
                    "{}{}{}",
                    &result[..start],
                    code.bright_green(),
                    &result[start + 2 + end..]
                );
            } else {
                break;
            }
        }

        // Bold
        while let Some(start) = result.find("**") {
            if let Some(end) = result[start + 2..].find("**") {
                let bold_text = &result[start + 2..start + 2 + end];
                result = format!(
                    "{}{}{}",
                    &result[..start],
                    bold_text.bold(),
                    &result[start + 4 + end..]
                );
            } else {
                break;
            }
        }

        if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            return format!("  {} {}", "•".bright_cyan(), rest);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_num() {
        assert_eq!(format_num(0), "0");
        assert_eq!(format_num(999), "999");
        assert_eq!(format_num(1000), "1,000");
        assert_eq!(format_num(1234567), "1,234,567");
    }

    #[test]
    fn test_markdown_list_item() {
        colored::control::set_override(false);
        let output = OutputHandler::new(false, true);
        assert_eq!(output.render_markdown_line("- item"), "  • item");
        assert_eq!(output.render_markdown_line("## Findings"), "Findings");
    }
}
