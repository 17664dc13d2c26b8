use leadline_core::config::{AppConfig, LoadOptions};
use leadline_core::script::QuestionScript;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ScriptEntry<'a> {
    position: usize,
    key: &'a str,
    label: &'a str,
    prompt: &'a str,
}

pub fn run(json_output: bool) -> CommandResult {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => CommandResult::rendered(0, render(&config.script, json_output)),
        Err(error) => CommandResult::failure(
            "script",
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        ),
    }
}

pub fn render(script: &QuestionScript, json_output: bool) -> String {
    let entries: Vec<ScriptEntry<'_>> = script
        .questions()
        .iter()
        .enumerate()
        .map(|(index, question)| ScriptEntry {
            position: index + 1,
            key: &question.key,
            label: &question.label,
            prompt: &question.prompt,
        })
        .collect();

    if json_output {
        return serde_json::to_string_pretty(&entries).unwrap_or_else(|error| {
            format!("{{\"error\":\"{}\"}}", crate::commands::escape_json(&error.to_string()))
        });
    }

    let mut lines = vec![format!("question script ({} questions):", entries.len())];
    lines.extend(entries.iter().map(|entry| {
        format!("{}. {} [{}] {}", entry.position, entry.key, entry.label, entry.prompt)
    }));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use leadline_core::script::QuestionScript;

    use super::render;

    #[test]
    fn human_output_lists_questions_in_order() {
        let output = render(&QuestionScript::lead_qualification(), false);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "question script (4 questions):");
        assert_eq!(lines[1], "1. name [Name] What is your name?");
        assert!(lines[4].starts_with("4. notes [Notes] "));
    }
}
