//! Topic derivation from subscription documents.

use std::collections::HashSet;

use graphql_parser::query::{
    Definition, Document, OperationDefinition, Selection, SelectionSet, parse_query,
};

use crate::errors::{GraphQLError, SubscriptionError};
use crate::protocol::frames::StartPayload;

/// Prefix of the per-topic handle key.
pub const HANDLE_KEY_PREFIX: &str = "graphql.subscription.";

type Doc<'a> = Document<'a, &'a str>;

/// Name of the first top-level field selected by the first subscription
/// operation in `query`.
///
/// Operation names play no part: an anonymous operation and one whose name
/// differs from the client's `operationName` resolve the same way.
/// Returns `Ok(None)` when the document parses but has no subscription
/// operation or selects no field.
pub fn topic_from_query(query: &str) -> Result<Option<String>, SubscriptionError> {
    let document: Doc<'_> = parse_query::<&str>(query).map_err(|e| {
        let message = e.to_string();
        let mut error = GraphQLError::new(message.trim().to_string());
        if let Some((line, column)) = error_position(&message) {
            error = error.at(line, column);
        }
        SubscriptionError::InvalidQuery {
            errors: vec![error],
        }
    })?;

    let selection_set = document.definitions.iter().find_map(|def| match def {
        Definition::Operation(OperationDefinition::Subscription(sub)) => Some(&sub.selection_set),
        _ => None,
    });

    Ok(selection_set.and_then(|set| first_field(&document, set, &mut HashSet::new())))
}

fn first_field<'a>(
    document: &'a Doc<'a>,
    set: &'a SelectionSet<'a, &'a str>,
    seen_fragments: &mut HashSet<&'a str>,
) -> Option<String> {
    for item in &set.items {
        let found = match item {
            Selection::Field(field) => Some(field.name.to_string()),
            Selection::InlineFragment(inline) => {
                first_field(document, &inline.selection_set, seen_fragments)
            }
            Selection::FragmentSpread(spread) => {
                if !seen_fragments.insert(spread.fragment_name) {
                    continue;
                }
                document.definitions.iter().find_map(|def| match def {
                    Definition::Fragment(frag) if frag.name == spread.fragment_name => {
                        first_field(document, &frag.selection_set, seen_fragments)
                    }
                    _ => None,
                })
            }
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Pull `line:column` out of a parser message like `Parse error at 1:15`.
fn error_position(message: &str) -> Option<(usize, usize)> {
    let rest = &message[message.find(" at ")? + 4..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == ':'))
        .unwrap_or(rest.len());
    let (line, column) = rest[..end].split_once(':')?;
    Some((line.parse().ok()?, column.parse().ok()?))
}

/// Topic for a registration: the explicit topic when given, otherwise the
/// one derived from the payload's query.
pub fn topic_key(
    params: &StartPayload,
    explicit_topic: Option<&str>,
) -> Result<Option<String>, SubscriptionError> {
    match explicit_topic.filter(|t| !t.is_empty()) {
        Some(topic) => Ok(Some(topic.to_string())),
        None => topic_from_query(&params.query),
    }
}

/// Namespaced key for a topic.
pub fn handle_key(topic: &str) -> String {
    format!("{HANDLE_KEY_PREFIX}{topic}")
}
