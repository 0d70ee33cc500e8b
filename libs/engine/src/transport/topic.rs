//! Topic names and subscription filters.

/// A publish topic: non-empty, no wildcards.
pub fn valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains('+') && !topic.contains('#')
}

/// A subscription filter: `#` only as a whole last level, `+` only as a whole level.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let Some((last, remaining)) = levels.split_last() else {
        return false;
    };
    if remaining.iter().any(|level| level.contains('#')) {
        return false;
    }
    if last.len() != 1 && last.contains('#') {
        return false;
    }
    levels.iter().all(|level| *level == "+" || !level.contains('+'))
}

/// Does `topic` match `filter`? Neither side is validated here.
///
/// Topics starting with `$` never match wildcard filters.
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && !filter.starts_with('$') {
        return false;
    }

    let mut topics = topic.split('/');
    for f in filter.split('/') {
        // a/b/# also matches a/b
        if f == "#" {
            return true;
        }
        match topics.next() {
            Some(_) if f == "+" => continue,
            Some(t) if t == f => continue,
            _ => return false,
        }
    }

    topics.next().is_none()
}
