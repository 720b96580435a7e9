use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub id: String,
    pub text: String,
}

/// Outbound message: plain text or a numbered structured prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Text(String),
    Options { text: String, options: Vec<ReplyOption> },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text(text) | Self::Options { text, .. } => text,
        }
    }

    /// Channel-friendly rendering: options become numbered lines under the prompt.
    pub fn render_plain(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Options { text, options } => {
                let mut rendered = text.clone();
                for option in options {
                    rendered.push_str(&format!("\n{}. {}", option.id, option.text));
                }
                rendered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Reply, ReplyOption};

    #[test]
    fn replies_serialize_as_string_or_object() {
        let text = serde_json::to_value(Reply::text("hello")).expect("serialize text");
        assert_eq!(text, serde_json::json!("hello"));

        let options = Reply::Options {
            text: "Which one?".to_owned(),
            options: vec![ReplyOption { id: "1".to_owned(), text: "Gas".to_owned() }],
        };
        let value = serde_json::to_value(&options).expect("serialize options");
        assert_eq!(value["options"][0]["id"], "1");
        assert_eq!(options.render_plain(), "Which one?\n1. Gas");
    }
}
