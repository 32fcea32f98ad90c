//! Rule collection: unique inserts, partial updates, and the active-rule
//! queries the engine evaluates against.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::db::{column_decode_err, datetime_from_millis, millis, opt_datetime_from_millis, Database};
use crate::error::SentinelError;
use crate::rule::{Rule, RuleConditions, RuleUpdate};
use crate::source::SourceType;

const RULE_COLUMNS: &str =
    "rule_id, source_type, name, description, conditions, is_active, priority, created_at, \
     updated_at";

/// Filter for rule listings; unset fields match everything
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleFilter {
    pub source_type: Option<SourceType>,
    pub is_active: Option<bool>,
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let source_raw: String = row.get(1)?;
    let source_type: SourceType = source_raw
        .parse()
        .map_err(|e| column_decode_err(1, e))?;
    let conditions_raw: String = row.get(4)?;
    let conditions: RuleConditions =
        serde_json::from_str(&conditions_raw).map_err(|e| column_decode_err(4, e))?;

    Ok(Rule {
        rule_id: row.get(0)?,
        source_type,
        name: row.get(2)?,
        description: row.get(3)?,
        conditions,
        is_active: row.get(5)?,
        priority: row.get(6)?,
        created_at: datetime_from_millis(7, row.get(7)?)?,
        updated_at: opt_datetime_from_millis(8, row.get(8)?)?,
    })
}

#[derive(Clone)]
pub struct RuleStore {
    db: Database,
}

impl RuleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert unless a rule with the same id exists. Returns false when it
    /// did. The check and the insert run inside one store call, which the
    /// connection executes atomically.
    pub async fn try_insert(&self, rule: &Rule) -> Result<bool, SentinelError> {
        let conditions = serde_json::to_string(&rule.conditions)?;
        let rule = rule.clone();
        let inserted = self
            .db
            .conn()
            .call(move |conn| {
                let exists: i64 = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM rules WHERE rule_id = ?1)",
                    params![rule.rule_id],
                    |row| row.get(0),
                )?;
                if exists != 0 {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO rules (rule_id, source_type, name, description, conditions, \
                     is_active, priority, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        rule.rule_id,
                        rule.source_type.as_str(),
                        rule.name,
                        rule.description,
                        conditions,
                        rule.is_active,
                        rule.priority,
                        millis(rule.created_at),
                        rule.updated_at.map(millis),
                    ],
                )?;
                Ok(true)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn get(&self, rule_id: &str) -> Result<Option<Rule>, SentinelError> {
        let id = rule_id.to_string();
        let rule = self
            .db
            .conn()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT {RULE_COLUMNS} FROM rules WHERE rule_id = ?1"),
                        params![id],
                        rule_from_row,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(rule)
    }

    /// Apply a partial update; untouched fields keep their stored values.
    /// Returns false when the rule does not exist.
    pub async fn update(
        &self,
        rule_id: &str,
        update: &RuleUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool, SentinelError> {
        let id = rule_id.to_string();
        let mut sets: Vec<&str> = vec!["updated_at = ?"];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(millis(now))];

        if let Some(name) = &update.name {
            sets.push("name = ?");
            values.push(SqlValue::Text(name.clone()));
        }
        if let Some(description) = &update.description {
            sets.push("description = ?");
            values.push(SqlValue::Text(description.clone()));
        }
        if let Some(conditions) = &update.conditions {
            sets.push("conditions = ?");
            values.push(SqlValue::Text(serde_json::to_string(conditions)?));
        }
        if let Some(is_active) = update.is_active {
            sets.push("is_active = ?");
            values.push(SqlValue::Integer(i64::from(is_active)));
        }
        if let Some(priority) = update.priority {
            sets.push("priority = ?");
            values.push(SqlValue::Integer(priority));
        }
        if let Some(source_type) = update.source_type {
            sets.push("source_type = ?");
            values.push(SqlValue::Text(source_type.as_str().to_string()));
        }
        values.push(SqlValue::Text(id));

        let sql = format!("UPDATE rules SET {} WHERE rule_id = ?", sets.join(", "));
        let changed = self
            .db
            .conn()
            .call(move |conn| {
                let changed = conn.execute(&sql, params_from_iter(values))?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    /// Returns false when the rule did not exist
    pub async fn delete(&self, rule_id: &str) -> Result<bool, SentinelError> {
        let id = rule_id.to_string();
        let deleted = self
            .db
            .conn()
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM rules WHERE rule_id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await?;
        Ok(deleted)
    }

    /// Filtered listing, highest priority first, insertion order on ties
    pub async fn list(&self, filter: RuleFilter) -> Result<Vec<Rule>, SentinelError> {
        let mut conds: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(source) = filter.source_type {
            conds.push("source_type = ?");
            values.push(SqlValue::Text(source.as_str().to_string()));
        }
        if let Some(is_active) = filter.is_active {
            conds.push("is_active = ?");
            values.push(SqlValue::Integer(i64::from(is_active)));
        }
        let where_sql = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules{where_sql} ORDER BY priority DESC, id ASC"
        );
        let rules = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rules = stmt
                    .query_map(params_from_iter(values), rule_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }

    /// Active rules for one source type, highest priority first
    pub async fn active_for_source(
        &self,
        source_type: SourceType,
    ) -> Result<Vec<Rule>, SentinelError> {
        let source = source_type.as_str();
        let rules = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RULE_COLUMNS} FROM rules \
                     WHERE source_type = ?1 AND is_active = 1 \
                     ORDER BY priority DESC, id ASC"
                ))?;
                let rules = stmt
                    .query_map(params![source], rule_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }

    /// Every active rule across all source types, highest priority first
    pub async fn all_active(&self) -> Result<Vec<Rule>, SentinelError> {
        self.query_rules(format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE is_active = 1 \
             ORDER BY priority DESC, id ASC"
        ))
        .await
    }

    async fn query_rules(&self, sql: String) -> Result<Vec<Rule>, SentinelError> {
        let rules = self
            .db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rules = stmt
                    .query_map([], rule_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }
}
