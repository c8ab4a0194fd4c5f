//! Prompt construction. Pure: identical input, identical text.
//!
//! Templates come from [`PromptsConfig`]; placeholders are `{name}` and are
//! substituted in a single pass, so braces inside the reviewed content or a
//! rule body are never expanded.

use std::fmt::Write as _;

use csr_core::{PromptsConfig, ReviewOptions, Rule, Strictness};

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    config: PromptsConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptsConfig) -> Self {
        Self { config }
    }

    /// Fixed instruction text: output schema plus the per-rule evaluation requirement.
    pub fn instruction(&self) -> &str {
        &self.config.system_prompt
    }

    /// Task text carrying `rules` and the full content.
    pub fn task(
        &self,
        content: &str,
        rules: &[&Rule],
        strictness: Strictness,
        options: &ReviewOptions,
    ) -> String {
        let mut rules_text = String::new();
        for rule in rules {
            let tags = rule.tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
            let line = render(
                &self.config.rule_format,
                &[
                    ("standard_ref", rule.standard_ref.as_str()),
                    ("title", rule.title.as_str()),
                    ("body", rule.body.as_str()),
                    ("tags", tags.as_str()),
                ],
            );
            let _ = writeln!(rules_text, "{line}");
        }

        let rationale = if options.return_rationale {
            "Include a rationale for each observation."
        } else {
            "Set rationale to null."
        };
        let excerpts = if options.return_excerpts {
            "Quote the relevant part of the standard in standard_excerpt."
        } else {
            "Set standard_excerpt to null."
        };
        let content_length = content.chars().count().to_string();
        let rule_count = rules.len().to_string();

        render(
            &self.config.user_prompt_template,
            &[
                ("rules_text", rules_text.as_str()),
                (
                    "strictness_instruction",
                    self.config.strictness_instructions.for_strictness(strictness),
                ),
                ("content_length", content_length.as_str()),
                ("content", content),
                ("rule_count", rule_count.as_str()),
                ("rationale_instruction", rationale),
                ("excerpt_instruction", excerpts),
            ],
        )
    }

    /// One task per rule, each carrying only that rule.
    pub fn single_rule_tasks(
        &self,
        content: &str,
        rules: &[&Rule],
        strictness: Strictness,
        options: &ReviewOptions,
    ) -> Vec<String> {
        rules
            .iter()
            .map(|rule| self.task(content, &[*rule], strictness, options))
            .collect()
    }
}

/// Replace each `{name}` in `template`. Unknown `{...}` stays literal.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values.iter().find_map(|(name, value)| {
            tail.strip_prefix(name)
                .and_then(|t| t.strip_prefix('}'))
                .map(|after| (*value, after))
        });
        match hit {
            Some((value, after)) => {
                out.push_str(value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
