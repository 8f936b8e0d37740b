//! Request path and query canonicalization.
//!
//! Clients disagree on casing (`/items` vs `/Items`, `parentid` vs
//! `parentId`), may prefix everything with `/emby`, and sometimes send
//! doubled or trailing slashes. Requests are rewritten to the spelling the
//! route table uses before routing happens.

use axum::extract::Request;
use axum::http::uri::{PathAndQuery, Uri};
use std::collections::HashMap;

/// Query parameter names in their canonical spelling.
const QUERY_PARAMS: &[&str] = &[
    "adjacentTo",
    "api_key",
    "client",
    "deviceId",
    "enableImages",
    "enableTotalRecordCount",
    "enableUserData",
    "entryIds",
    "excludeItemTypes",
    "fillHeight",
    "fillWidth",
    "filters",
    "genreIds",
    "genres",
    "height",
    "id",
    "ids",
    "imageTypeLimit",
    "includeItemTypes",
    "is4K",
    "isFavorite",
    "isHd",
    "isMissing",
    "isPlayed",
    "limit",
    "markAsWatched",
    "maxHeight",
    "maxWidth",
    "mediaSourceId",
    "mediaTypes",
    "name",
    "nameStartsWith",
    "officialRatings",
    "parentId",
    "personIds",
    "positionTicks",
    "quality",
    "recursive",
    "searchTerm",
    "seasonId",
    "seriesId",
    "sortBy",
    "sortOrder",
    "startIndex",
    "startItemId",
    "static",
    "tag",
    "userId",
    "width",
    "years",
];

/// Static path segments of every registered route, keyed by segment count
/// and position, so a request segment can be matched case-insensitively.
#[derive(Debug, Default)]
pub struct RouteIndex {
    by_len: HashMap<usize, Vec<HashMap<String, String>>>,
}

impl RouteIndex {
    pub fn new<'a>(routes: impl IntoIterator<Item = &'a str>) -> Self {
        let mut by_len: HashMap<usize, Vec<HashMap<String, String>>> = HashMap::new();
        for route in routes {
            let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
            let slots = by_len
                .entry(segments.len())
                .or_insert_with(|| vec![HashMap::new(); segments.len()]);
            for (i, seg) in segments.iter().enumerate() {
                if seg.starts_with(':') || seg.starts_with('*') {
                    continue;
                }
                slots[i]
                    .entry(seg.to_lowercase())
                    .or_insert_with(|| seg.to_string());
            }
        }
        Self { by_len }
    }

    /// Replace segments that case-insensitively match a static route segment.
    pub fn canonicalize(&self, path: &str) -> String {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(slots) = self.by_len.get(&segments.len()) else {
            return path.to_string();
        };
        let mut out = String::with_capacity(path.len());
        for (i, seg) in segments.iter().enumerate() {
            out.push('/');
            match slots[i].get(&seg.to_lowercase()) {
                Some(canonical) => out.push_str(canonical),
                None => out.push_str(seg),
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

/// Collapse slashes, strip any `/emby` prefix and the trailing slash, then
/// fix segment casing.
pub fn normalize_path(index: &RouteIndex, path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    while segments
        .first()
        .is_some_and(|s| s.eq_ignore_ascii_case("emby"))
    {
        segments.remove(0);
    }
    let collapsed = format!("/{}", segments.join("/"));
    index.canonicalize(&collapsed)
}

/// Lowercase parameter names, map known ones to their canonical spelling and
/// drop `fields`.
pub fn normalize_query(query: &str) -> String {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (pair, None),
            };
            let lower = key.to_lowercase();
            if lower == "fields" {
                return None;
            }
            let key = QUERY_PARAMS
                .iter()
                .find(|p| p.eq_ignore_ascii_case(&lower))
                .map(|p| p.to_string())
                .unwrap_or(lower);
            Some(match value {
                Some(v) => format!("{key}={v}"),
                None => key,
            })
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn normalize_uri(index: &RouteIndex, uri: &Uri) -> Option<Uri> {
    let path = normalize_path(index, uri.path());
    let query = uri.query().map(normalize_query).unwrap_or_default();
    let pq = if query.is_empty() {
        path
    } else {
        format!("{path}?{query}")
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(pq).ok()?);
    Uri::from_parts(parts).ok()
}

pub fn normalize_request(index: &RouteIndex, mut req: Request) -> Request {
    if let Some(uri) = normalize_uri(index, req.uri()) {
        if uri != *req.uri() {
            tracing::trace!("Rewrote {} to {}", req.uri(), uri);
            *req.uri_mut() = uri;
        }
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> RouteIndex {
        RouteIndex::new([
            "/Items",
            "/Items/:item_id",
            "/Items/:item_id/Images/:image_type",
            "/Users/:user_id/Items/Latest",
            "/Shows/NextUp",
            "/System/Info/Public",
        ])
    }

    #[test]
    fn test_normalize_path() {
        let idx = index();
        assert_eq!(normalize_path(&idx, "/emby/items"), "/Items");
        assert_eq!(normalize_path(&idx, "//Emby//shows/nextup/"), "/Shows/NextUp");
        assert_eq!(normalize_path(&idx, "/system/info/public"), "/System/Info/Public");
        assert_eq!(
            normalize_path(&idx, "/items/abcDEF/images/primary"),
            "/Items/abcDEF/Images/primary"
        );
        assert_eq!(normalize_path(&idx, "/"), "/");
        assert_eq!(normalize_path(&idx, "/emby"), "/");
        assert_eq!(normalize_path(&idx, "/embyfoo/items"), "/embyfoo/items");
    }

    #[test]
    fn test_path_idempotent() {
        let idx = index();
        for p in [
            "/emby/emby/items/",
            "/USERS/u1/items/LATEST",
            "///",
            "/Unknown/Path",
            "/items/x/IMAGES/Primary",
        ] {
            let once = normalize_path(&idx, p);
            assert_eq!(normalize_path(&idx, &once), once, "input {p}");
        }
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("parentid=collection_1&FIELDS=Overview&is4k=true&Foo=Bar"),
            "parentId=collection_1&is4K=true&foo=Bar"
        );
        assert_eq!(normalize_query("api_key=x&flag"), "api_key=x&flag");
        let once = normalize_query("SortBy=SortName&sortorder=Descending");
        assert_eq!(normalize_query(&once), once);
    }

    #[test]
    fn test_normalize_uri() {
        let uri: Uri = "/emby/items?parentid=collection_1".parse().unwrap();
        let out = normalize_uri(&index(), &uri).unwrap();
        assert_eq!(out.to_string(), "/Items?parentId=collection_1");
    }
}
