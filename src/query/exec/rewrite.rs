//! Wildcard expansion against the discovered field and tag schema

use super::FieldDimensions;
use crate::query::ast::{Dimension, Expr, Field, SelectStatement};

/// Expand wildcards against the discovered schema.
///
/// `SELECT *` becomes one typed var ref per field in name order, and `GROUP BY *`
/// becomes every known dimension not already grouped on. Tags are never projected
/// as columns by the wildcard.
pub fn rewrite_fields(stmt: &SelectStatement, schema: &FieldDimensions) -> SelectStatement {
    let mut rewritten = stmt.clone();

    rewritten.fields = Vec::with_capacity(stmt.fields.len());
    for field in &stmt.fields {
        match &field.expr {
            Expr::Wildcard => {
                for (name, data_type) in &schema.fields {
                    rewritten.fields.push(Field::new(Expr::VarRef {
                        name: name.clone(),
                        data_type: Some(*data_type),
                    }));
                }
            }
            _ => rewritten.fields.push(field.clone()),
        }
    }

    if stmt.dimensions.iter().any(|d| matches!(d, Dimension::Wildcard)) {
        let explicit = stmt.tag_dimensions();
        let mut dimensions: Vec<Dimension> = stmt
            .dimensions
            .iter()
            .filter(|d| !matches!(d, Dimension::Wildcard))
            .cloned()
            .collect();
        dimensions.extend(
            schema
                .dimensions
                .iter()
                .filter(|d| !explicit.contains(d))
                .map(|d| Dimension::Tag(d.clone())),
        );
        rewritten.dimensions = dimensions;
    }

    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use crate::query::ast::Statement;
    use crate::query::parser::parse_statement;

    fn schema() -> FieldDimensions {
        let mut fd = FieldDimensions::default();
        fd.fields.insert("usage".to_string(), DataType::Float);
        fd.fields.insert("idle".to_string(), DataType::Integer);
        fd.dimensions.insert("host".to_string());
        fd.dimensions.insert("region".to_string());
        fd
    }

    fn select(text: &str) -> SelectStatement {
        match parse_statement(text).unwrap() {
            Statement::Select(s) => s,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn expands_field_wildcard() {
        let out = rewrite_fields(&select("SELECT * FROM cpu"), &schema());
        assert_eq!(out.to_string(), "SELECT idle::integer, usage::float FROM cpu");
    }

    #[test]
    fn expands_group_by_wildcard_without_duplicates() {
        let out = rewrite_fields(&select("SELECT usage FROM cpu GROUP BY region, *"), &schema());
        assert_eq!(out.tag_dimensions(), vec!["region", "host"]);
    }

    #[test]
    fn leaves_explicit_fields_alone() {
        let stmt = select("SELECT mean(usage) AS u FROM cpu GROUP BY host");
        assert_eq!(rewrite_fields(&stmt, &schema()), stmt);
    }
}
