//! Prompt construction for natural language translation
//!
//! The prompt carries column names, roles and declared types only. Cell
//! values never leave the process.

use serde::Serialize;
use tally_ir::Schema;
use tally_registry::FunctionRegistry;

use crate::validate::ValidationErrors;

/// System prompt - teaches the model the query specification format
pub const SYSTEM_PROMPT: &str = r#"You are an expert at converting natural language questions about a table into a time-bucketed aggregation query in JSON format.

Query Format:
```json
{
  "time_grain": "monthly",        // none, daily, weekly, monthly, quarterly
  "temporal_column": "order_date", // required unless time_grain is "none"
  "group_by": ["region"],          // categorical or temporal columns, may be empty
  "measures": [
    {"column": "revenue", "func": "sum"}
  ],
  "date_range": {"start": "2024-01-01", "end": "2024-03-31"}  // optional, inclusive
}
```

Column roles:
- temporal: dates and timestamps, the only valid "temporal_column"
- categorical: labels such as region or product, valid in "group_by"
- measure: numbers, valid targets of sum, mean, min and max

Important Rules:
1. Always return ONLY valid JSON - no markdown, no explanations
2. Use column names exactly as listed in the schema below
3. Only "count" may target a non-measure column
4. Never group by a measure column
5. Never invent columns; if the question names something that does not exist, use the closest listed column
6. Omit "date_range" unless the question names a period

Examples:

Question: "total revenue by region per quarter"
Response:
{"time_grain": "quarterly", "temporal_column": "date", "group_by": ["region"], "measures": [{"column": "revenue", "func": "sum"}]}

Question: "average order value each month"
Response:
{"time_grain": "monthly", "temporal_column": "date", "group_by": [], "measures": [{"column": "order_value", "func": "mean"}]}

Question: "how many orders per product"
Response:
{"time_grain": "none", "group_by": ["product"], "measures": [{"column": "order_id", "func": "count"}]}

Question: "weekly min and max price in the first quarter of 2024"
Response:
{"time_grain": "weekly", "temporal_column": "date", "group_by": [], "measures": [{"column": "price", "func": "min"}, {"column": "price", "func": "max"}], "date_range": {"start": "2024-01-01", "end": "2024-03-31"}}

Return ONLY the JSON, no other text."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Conversation handed to a model call: system text plus alternating turns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// Initial prompt for a question against `schema`
    pub fn for_question(question: &str, schema: &Schema, registry: &FunctionRegistry) -> Self {
        let system = format!(
            "{}\n\n## Table Schema\n\n{}\n\n## Aggregation Functions\n\n{}",
            SYSTEM_PROMPT,
            schema_table(schema),
            serde_json::to_string_pretty(&registry.catalog_json()).unwrap_or_default(),
        );
        Self {
            system,
            messages: vec![PromptMessage {
                role: Role::User,
                content: question.to_string(),
            }],
        }
    }

    /// Append the rejected candidate and corrective feedback
    pub fn push_feedback(&mut self, candidate: &str, feedback: &str) {
        self.messages.push(PromptMessage {
            role: Role::Assistant,
            content: candidate.to_string(),
        });
        self.messages.push(PromptMessage {
            role: Role::User,
            content: format!(
                "Error: your query was rejected:\n{}\nPlease fix these problems and return the corrected JSON only.",
                feedback
            ),
        });
    }

    pub fn push_violations(&mut self, candidate: &str, errors: &ValidationErrors) {
        self.push_feedback(candidate, &errors.bullet_list());
    }

    /// Flatten into a single text block, for completion-style backends and logs
    pub fn render(&self) -> String {
        let mut out = self.system.clone();
        for message in &self.messages {
            let who = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(&format!("\n\n{}: {}", who, message.content));
        }
        out
    }
}

/// Markdown table of name, role and type
fn schema_table(schema: &Schema) -> String {
    let mut out = String::from("| column | role | type |\n|---|---|---|");
    for column in &schema.columns {
        out.push_str(&format!("\n| {} | {} | {} |", column.name, column.role, column.data_type));
    }
    out
}
