//! Filter execution, ordering and cursor pagination over a partition.
//!
//! Resume keys carry `user_id`, `id` and the entity's value for every sort
//! field (`sort.<field>`), so a page resumes strictly after the last item
//! even when that item has since been deleted.

use kg_01_query::{
    compare_entities, compare_sort_values, decode_cursor, encode_cursor, Filter, Page, Pagination, Query, QueryOptions,
    ResumeKey, SortDirection, SortKey, DEFAULT_LIMIT,
};
use serde_json::Value;
use shared_types::{AsEntityRef, FieldValue, RepositoryError, RepositoryResult, UserId};
use std::cmp::Ordering;

const SORT_PREFIX: &str = "sort.";

/// Where a page starts and how long it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PageRequest {
    pub limit: usize,
    pub offset: usize,
    pub after: Option<ResumeKey>,
}

impl PageRequest {
    pub fn from_options(options: &QueryOptions) -> RepositoryResult<Self> {
        let after = match options.cursor.as_deref() {
            Some(token) => decode_cursor(token)?,
            None => None,
        };
        Ok(Self {
            limit: effective_limit(options.limit),
            offset: options.offset.unwrap_or(0) as usize,
            after,
        })
    }

    pub fn from_query(query: &Query) -> RepositoryResult<Self> {
        let (offset, after) = match &query.pagination {
            Pagination::FirstPage => (0, None),
            Pagination::Offset { offset } => (*offset as usize, None),
            Pagination::Cursor { token } => (0, decode_cursor(token)?),
            Pagination::Keyset { after } => (0, Some(after.clone())),
        };
        Ok(Self {
            limit: effective_limit(query.limit),
            offset,
            after,
        })
    }
}

fn effective_limit(limit: u32) -> usize {
    if limit == 0 {
        DEFAULT_LIMIT as usize
    } else {
        limit as usize
    }
}

/// Sort keys from options, falling back to the default order.
pub(crate) fn sort_keys(options: &QueryOptions) -> Vec<SortKey> {
    if options.sort.is_empty() {
        QueryOptions::default().sort
    } else {
        options.sort.clone()
    }
}

pub(crate) fn resume_key<E: AsEntityRef + ?Sized>(
    entity: &E,
    sort: &[SortKey],
) -> RepositoryResult<ResumeKey> {
    let entity = entity.as_entity_ref();
    let mut key = ResumeKey::new();
    key.insert(
        "user_id".to_string(),
        Value::String(entity.user_id().to_string()),
    );
    key.insert("id".to_string(), Value::String(entity.id().to_string()));
    for sort_key in sort {
        if let Some(value) = entity.field_value(&sort_key.field) {
            key.insert(
                format!("{SORT_PREFIX}{}", sort_key.field),
                serde_json::to_value(value)?,
            );
        }
    }
    Ok(key)
}

/// A decoded resume key.
struct ResumePoint {
    values: Vec<Option<FieldValue>>,
    id: String,
}

impl ResumePoint {
    fn decode(user_id: &UserId, key: &ResumeKey, sort: &[SortKey]) -> RepositoryResult<Self> {
        if let Some(owner) = key.get("user_id").and_then(Value::as_str) {
            if owner != user_id.as_str() {
                return Err(RepositoryError::validation(
                    "cursor",
                    "cursor was issued for another user",
                ));
            }
        }
        let id = key
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RepositoryError::validation("cursor", "resume key has no id"))?
            .to_string();
        let values = sort
            .iter()
            .map(|sort_key| {
                key.get(&format!("{SORT_PREFIX}{}", sort_key.field))
                    .map(|raw| serde_json::from_value::<FieldValue>(raw.clone()))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values, id })
    }

    /// Whether `entity` sorts strictly after this point.
    fn precedes<E: AsEntityRef + ?Sized>(&self, entity: &E, sort: &[SortKey]) -> bool {
        let entity = entity.as_entity_ref();
        for (sort_key, resume) in sort.iter().zip(&self.values) {
            let ordering =
                compare_sort_values(entity.field_value(&sort_key.field).as_ref(), resume.as_ref());
            let ordering = match sort_key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering == Ordering::Greater;
            }
        }
        entity.id() > self.id.as_str()
    }
}

/// Filter, order and slice `items` into one page.
pub(crate) fn execute_query<'a, T, I>(
    user_id: &UserId,
    items: I,
    filter: &Filter,
    sort: &[SortKey],
    request: &PageRequest,
) -> RepositoryResult<Page<T>>
where
    T: AsEntityRef + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut matched: Vec<&T> = items.into_iter().filter(|item| filter.matches(*item)).collect();
    matched.sort_by(|a, b| compare_entities(sort, *a, *b));

    let start = match &request.after {
        Some(key) => {
            let point = ResumePoint::decode(user_id, key, sort)?;
            matched
                .iter()
                .position(|item| point.precedes(*item, sort))
                .unwrap_or(matched.len())
        }
        None => request.offset.min(matched.len()),
    };
    let end = start.saturating_add(request.limit).min(matched.len());

    let items: Vec<T> = matched[start..end].iter().map(|item| (*item).clone()).collect();
    let next_cursor = match items.last() {
        Some(last) if end < matched.len() => encode_cursor(&resume_key(last, sort)?)?,
        _ => String::new(),
    };
    Ok(Page::new(items, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use shared_types::{Node, NodeId};

    fn nodes(user: &UserId, count: i64) -> Vec<Node> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                Node::new(user.clone(), format!("node {i}"))
                    .with_id(NodeId::new(format!("n{i:02}")))
                    .with_created_at(base + Duration::minutes(i))
            })
            .collect()
    }

    fn request(limit: usize) -> PageRequest {
        PageRequest {
            limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_cursor_walks_every_item_once() {
        let user = UserId::new("u");
        let all = nodes(&user, 7);
        let sort = vec![SortKey::descending("created_at")];
        let filter = Filter::and(vec![]);

        let mut seen = Vec::new();
        let mut req = request(3);
        loop {
            let page = execute_query(&user, &all, &filter, &sort, &req).unwrap();
            seen.extend(page.items.iter().map(|n| n.id.to_string()));
            if !page.has_more {
                break;
            }
            req.after = decode_cursor(&page.next_cursor).unwrap();
        }
        assert_eq!(seen, vec!["n06", "n05", "n04", "n03", "n02", "n01", "n00"]);
    }

    #[test]
    fn test_resume_after_deleted_item() {
        let user = UserId::new("u");
        let mut all = nodes(&user, 5);
        let sort = vec![SortKey::ascending("created_at")];
        let filter = Filter::and(vec![]);

        let first = execute_query(&user, &all, &filter, &sort, &request(2)).unwrap();
        assert_eq!(first.items.last().unwrap().id.as_str(), "n01");
        all.retain(|n| n.id.as_str() != "n01");

        let req = PageRequest {
            limit: 2,
            offset: 0,
            after: decode_cursor(&first.next_cursor).unwrap(),
        };
        let second = execute_query(&user, &all, &filter, &sort, &req).unwrap();
        let ids: Vec<&str> = second.items.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n02", "n03"]);
    }

    #[test]
    fn test_cursor_walk_over_sparse_metadata() {
        let user = UserId::new("u");
        let all: Vec<Node> = nodes(&user, 30)
            .into_iter()
            .enumerate()
            .map(|(i, mut node)| {
                if i % 3 != 0 {
                    node.metadata.insert("source".into(), format!("s{}", i % 4));
                }
                node
            })
            .collect();
        let filter = Filter::and(vec![]);

        for direction in [SortDirection::Ascending, SortDirection::Descending] {
            let sort = vec![SortKey::new("metadata.source", direction)];
            let mut seen = Vec::new();
            let mut req = request(4);
            loop {
                let page = execute_query(&user, &all, &filter, &sort, &req).unwrap();
                seen.extend(page.items.iter().map(|n| n.id.clone()));
                if !page.has_more {
                    break;
                }
                req.after = decode_cursor(&page.next_cursor).unwrap();
            }

            let mut expected: Vec<&Node> = all.iter().collect();
            expected.sort_by(|a, b| compare_entities(&sort, *a, *b));
            let expected: Vec<NodeId> = expected.into_iter().map(|n| n.id.clone()).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_last_page_has_empty_cursor() {
        let user = UserId::new("u");
        let all = nodes(&user, 2);
        let page = execute_query(
            &user,
            &all,
            &Filter::and(vec![]),
            &[SortKey::ascending("id")],
            &request(2),
        )
        .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.next_cursor.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_cursor_from_other_user_rejected() {
        let alice = UserId::new("alice");
        let all = nodes(&alice, 3);
        let sort = vec![SortKey::ascending("id")];
        let page = execute_query(&alice, &all, &Filter::and(vec![]), &sort, &request(1)).unwrap();

        let req = PageRequest {
            limit: 1,
            offset: 0,
            after: decode_cursor(&page.next_cursor).unwrap(),
        };
        let err = execute_query(&UserId::new("mallory"), &all, &Filter::and(vec![]), &sort, &req)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation { .. }));
    }

    #[test]
    fn test_offset_pagination() {
        let user = UserId::new("u");
        let all = nodes(&user, 5);
        let req = PageRequest {
            limit: 2,
            offset: 4,
            after: None,
        };
        let page = execute_query(
            &user,
            &all,
            &Filter::and(vec![]),
            &[SortKey::ascending("id")],
            &req,
        )
        .unwrap();
        assert_eq!(page.len(), 1);
        assert!(!page.has_more);
    }
}
