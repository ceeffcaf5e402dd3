use std::sync::Arc;

use crate::model::{normalize_for_filter, WindowItem};

/// Ranks the merged window set against a query. Titles dominate; owner
/// labels count at a reduced weight so "chrome" still surfaces windows
/// whose titles never mention the browser. An empty query passes everything
/// through in input order.
pub fn filter_items(
    items: &[Arc<WindowItem>],
    query: &str,
    limit: usize,
) -> Vec<Arc<WindowItem>> {
    let normalized_query = normalize_for_filter(query);
    if normalized_query.is_empty() {
        return cap(items.to_vec(), limit);
    }

    let mut scored: Vec<(i64, usize, &Arc<WindowItem>)> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            score_item(item, &normalized_query).map(|score| (score, index, item))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    cap(
        scored.into_iter().map(|(_, _, item)| Arc::clone(item)).collect(),
        limit,
    )
}

fn cap(mut items: Vec<Arc<WindowItem>>, limit: usize) -> Vec<Arc<WindowItem>> {
    if limit != 0 && items.len() > limit {
        items.truncate(limit);
    }
    items
}

fn score_item(item: &WindowItem, normalized_query: &str) -> Option<i64> {
    let title_score = score_text(&normalize_for_filter(&item.title()), normalized_query);
    let owner_score =
        score_text(&normalize_for_filter(&item.owner_label()), normalized_query).map(|s| s / 3);

    match (title_score, owner_score) {
        (None, None) => None,
        (title, owner) => Some(title.unwrap_or(0).max(owner.unwrap_or(0))),
    }
}

fn score_text(text: &str, query: &str) -> Option<i64> {
    if text.is_empty() || query.is_empty() {
        return None;
    }

    if let Some(position) = text.find(query) {
        let prefix_bonus = if position == 0 { 250 } else { 0 };
        let slack = (text.len() - query.len()) as i64;
        return Some(2_000 + prefix_bonus - position as i64 - slack);
    }

    let (start, gaps) = subsequence_cost(text, query)?;
    let slack = (text.len() as i64 - query.len() as i64).max(0);
    Some(700 - start as i64 - gaps as i64 * 5 - slack)
}

/// First-match greedy subsequence walk; returns the match start and the
/// total number of skipped characters between matched ones.
fn subsequence_cost(text: &str, query: &str) -> Option<(usize, usize)> {
    let mut chars = text.char_indices();
    let mut start = None;
    let mut gaps = 0;
    let mut last_end = 0;

    for wanted in query.chars() {
        let mut matched = None;
        for (offset, candidate) in chars.by_ref() {
            if candidate == wanted {
                matched = Some(offset);
                break;
            }
        }
        let offset = matched?;
        match start {
            None => start = Some(offset),
            Some(_) => gaps += offset.saturating_sub(last_end),
        }
        last_end = offset + wanted.len_utf8();
    }

    start.map(|s| (s, gaps))
}
