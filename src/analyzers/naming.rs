use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;

use super::{Analyzer, EvidenceChunk, NodeContext};
use crate::graph::NodeLabel;

const NAME: &str = "NamingConventions";

/// Tags entities by common ERP/database naming conventions. Pure string matching.
pub struct NamingConventionAnalyzer {
    table_rules: Vec<(Regex, &'static str)>,
    column_rules: Vec<(Regex, &'static str)>,
}

impl NamingConventionAnalyzer {
    pub fn new() -> Self {
        Self {
            table_rules: compile(&[
                (r"_rel(_id)?$", "junction_table_suffix"),
                (r"_(line|lines|item|items)$", "detail_table_suffix"),
                (r"^ir_", "system_internal_prefix"),
                (r"^res_", "master_data_prefix"),
                (r"^x_", "custom_entity_prefix"),
            ]),
            column_rules: compile(&[
                (r"^id$", "primary_key_candidate"),
                (r"^(create|write)_uid$", "audit_user"),
                (r"^(create|write)_date$", "audit_timestamp"),
                (r"_id$", "foreign_key_single_suffix"),
                (r"_ids$", "foreign_key_many_suffix"),
                (r"^(is|has|can|allow)_", "boolean_flag_prefix"),
                (r"amount|total|price|cost|value|revenue|balance", "monetary_value_keyword"),
                (r"qty|quantity|count|number", "quantity_keyword"),
                (r"date|due|_at|_on", "date_time_keyword"),
                (r"email|phone|mobile|fax|website|url", "contact_info_keyword"),
            ]),
        }
    }

    /// Sorted, de-duplicated tags for a bare table or column name.
    pub fn tags(&self, label: NodeLabel, name: &str) -> Vec<&'static str> {
        let rules = match label {
            NodeLabel::Table => &self.table_rules,
            NodeLabel::Column => &self.column_rules,
        };
        rules
            .iter()
            .filter(|(pattern, _)| pattern.is_match(name))
            .map(|(_, tag)| *tag)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Default for NamingConventionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(rules: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    rules
        .iter()
        .map(|(pattern, tag)| (Regex::new(pattern).expect("Invalid regex pattern"), *tag))
        .collect()
}

#[async_trait]
impl Analyzer for NamingConventionAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze(&self, context: &NodeContext) -> Option<EvidenceChunk> {
        let name = match context.entity.label {
            NodeLabel::Table => context.entity.name.as_str(),
            NodeLabel::Column => context.entity.column_parts()?.1,
        };

        let tags = self.tags(context.entity.label, name);
        if tags.is_empty() {
            return None;
        }
        Some(EvidenceChunk::new(
            NAME,
            tags.iter().map(|tag| format!("tag: {}", tag)).collect(),
        ))
    }
}
