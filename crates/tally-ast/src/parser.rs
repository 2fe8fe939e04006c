//! Pest-based parser for the query shorthand

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "query.pest"]
pub struct QueryParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),

    #[error("Unknown aggregation function: {0}")]
    UnknownFunction(String),

    #[error("Unknown time grain: {0}")]
    UnknownGrain(String),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(Box::new(err))
    }
}

/// Parse query shorthand into its AST
pub fn parse(source: &str) -> Result<QueryText, ParseError> {
    let mut pairs = QueryParser::parse(Rule::query, source)?;
    let query_pair = pairs.next().ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let mut query = QueryText {
        grain: None,
        temporal_column: None,
        measures: Vec::new(),
        group_by: Vec::new(),
        range: None,
    };

    for pair in query_pair.into_inner() {
        match pair.as_rule() {
            Rule::grain => {
                query.grain = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::grain_name)
                    .map(|p| p.as_str().to_lowercase());
            }
            Rule::on_clause => {
                query.temporal_column = columns_of(pair).into_iter().next();
            }
            Rule::measures => {
                for measure in pair.into_inner() {
                    query.measures.push(parse_measure(measure)?);
                }
            }
            Rule::by_clause => {
                query.group_by = columns_of(pair);
            }
            Rule::range_clause => {
                let dates: Vec<String> = pair
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::date)
                    .map(|p| p.as_str().to_string())
                    .collect();
                if let [start, end] = dates.as_slice() {
                    query.range = Some(RangeText {
                        start: start.clone(),
                        end: end.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    if query.measures.is_empty() {
        return Err(ParseError::Syntax("Missing measures".to_string()));
    }

    Ok(query)
}

fn parse_measure(pair: Pair<Rule>) -> Result<MeasureCall, ParseError> {
    let mut func = None;
    let mut column = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::func_name => func = Some(inner.as_str().to_string()),
            Rule::column => column = Some(column_name(inner)),
            _ => {}
        }
    }

    match (func, column) {
        (Some(func), Some(column)) => Ok(MeasureCall { func, column }),
        _ => Err(ParseError::Syntax("Malformed measure".to_string())),
    }
}

fn columns_of(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::column)
        .map(column_name)
        .collect()
}

fn column_name(pair: Pair<Rule>) -> String {
    match pair.into_inner().next() {
        Some(inner) if inner.as_rule() == Rule::quoted => inner
            .into_inner()
            .next()
            .map(|q| q.as_str().to_string())
            .unwrap_or_default(),
        Some(inner) => inner.as_str().to_string(),
        None => String::new(),
    }
}
