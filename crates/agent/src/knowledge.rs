//! Term-overlap ranking over knowledge blocks.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use fixdesk_core::lexicon::normalize_text;

use crate::collaborators::{KnowledgeBlock, KnowledgeContext, KnowledgeLookup};

const MIN_TERM_LEN: usize = 3;

#[derive(Debug, Default, Deserialize)]
struct KnowledgeFile {
    #[serde(default)]
    blocks: Vec<KnowledgeBlock>,
}

/// Reads `[[blocks]]` tables from a TOML file.
pub fn load_blocks(path: &Path) -> Result<Vec<KnowledgeBlock>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read knowledge file `{}`", path.display()))?;
    let file: KnowledgeFile = toml::from_str(&raw)
        .with_context(|| format!("could not parse knowledge file `{}`", path.display()))?;
    Ok(file.blocks)
}

fn terms(text: &str) -> BTreeSet<String> {
    normalize_text(text)
        .split(' ')
        .filter(|term| term.chars().count() >= MIN_TERM_LEN)
        .map(str::to_owned)
        .collect()
}

#[derive(Clone, Debug, Default)]
pub struct TermOverlapLookup;

impl KnowledgeLookup for TermOverlapLookup {
    fn find_relevant_blocks(
        &self,
        blocks: &[KnowledgeBlock],
        text: &str,
        context: &KnowledgeContext,
    ) -> Vec<KnowledgeBlock> {
        let mut query = terms(text);
        if let Some(equipment) = &context.equipment {
            query.extend(terms(&equipment.replace([':', '_'], " ")));
        }
        if query.is_empty() {
            return Vec::new();
        }

        let mut ranked: Vec<(usize, &KnowledgeBlock)> = blocks
            .iter()
            .filter_map(|block| {
                let haystack =
                    terms(&format!("{} {} {}", block.title, block.tags.join(" "), block.content));
                let score = query.intersection(&haystack).count();
                (score > 0).then_some((score, block))
            })
            .collect();
        ranked.sort_by(|(left_score, left), (right_score, right)| {
            right_score.cmp(left_score).then_with(|| left.id.cmp(&right.id))
        });

        let limit = if context.limit == 0 { 3 } else { context.limit };
        ranked.into_iter().take(limit).map(|(_, block)| block.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_blocks, TermOverlapLookup};
    use crate::collaborators::{KnowledgeBlock, KnowledgeContext, KnowledgeLookup};

    fn block(id: &str, title: &str, content: &str) -> KnowledgeBlock {
        KnowledgeBlock {
            id: id.to_owned(),
            title: title.to_owned(),
            content: content.to_owned(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn blocks_are_ranked_by_shared_terms() {
        let blocks = vec![
            block("hours", "Opening hours", "We work Monday to Saturday from 8am to 8pm."),
            block("warranty", "Warranty", "Every repair has a 90 day warranty on parts."),
            block("area", "Service area", "We cover the whole metropolitan area."),
        ];
        let found = TermOverlapLookup.find_relevant_blocks(
            &blocks,
            "how long is the warranty on the repair?",
            &KnowledgeContext { equipment: None, limit: 2 },
        );

        assert_eq!(found.first().map(|block| block.id.as_str()), Some("warranty"));
        assert!(found.len() <= 2);
    }

    #[test]
    fn unrelated_text_finds_nothing() {
        let blocks = vec![block("hours", "Opening hours", "Monday to Saturday")];
        let found = TermOverlapLookup.find_relevant_blocks(
            &blocks,
            "ok",
            &KnowledgeContext::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn blocks_load_from_toml() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("knowledge.toml");
        fs::write(
            &path,
            r#"
[[blocks]]
id = "payment"
title = "Payment"
content = "We accept pix and credit cards."
tags = ["pix", "card"]
"#,
        )
        .expect("write knowledge");

        let blocks = load_blocks(&path).expect("load blocks");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tags, vec!["pix".to_owned(), "card".to_owned()]);
    }
}
