use axum::{
    extract::Request,
    middleware,
    routing::MethodRouter,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

mod auth;
mod devices;
mod display_preferences;
mod dto;
mod error;
mod favorites;
mod filters;
mod ids;
mod images;
pub mod ipacl;
mod items;
mod library;
pub mod normalize;
mod playback;
mod playbackinfo;
mod playlists;
mod persons;
mod segments;
mod sessions;
mod shows;
mod stubs;
mod subtitles;
mod system;
mod users;
mod videos;
mod views;

use normalize::{normalize_request, RouteIndex};

/// A path in the route table with its handlers. Paths are written in the
/// canonical casing that request normalization rewrites to.
pub type Route = (&'static str, MethodRouter<Arc<AppState>>);

pub fn routes() -> Vec<Route> {
    [
        system::routes(),
        users::routes(),
        views::routes(),
        library::routes(),
        items::routes(),
        filters::routes(),
        shows::routes(),
        images::routes(),
        playbackinfo::routes(),
        videos::routes(),
        subtitles::routes(),
        playback::routes(),
        favorites::routes(),
        persons::routes(),
        playlists::routes(),
        devices::routes(),
        sessions::routes(),
        segments::routes(),
        display_preferences::routes(),
        stubs::routes(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// The complete HTTP application.
///
/// Requests are normalized before they reach the router, so the route table
/// sits behind a fallback service on an outer router carrying the layers.
/// Outermost first: access log, CORS, compression, IP allow-list.
pub fn app(state: Arc<AppState>) -> Router {
    let routes = routes();
    let index = Arc::new(RouteIndex::new(routes.iter().map(|(path, _)| *path)));
    tracing::debug!("Registered {} routes", routes.len());

    let inner = routes
        .into_iter()
        .fold(Router::new(), |router, (path, handlers)| router.route(path, handlers))
        .with_state(state.clone());

    let normalized = ServiceBuilder::new()
        .map_request(move |req: Request| normalize_request(&index, req))
        .service(inner);

    Router::new()
        .fallback_service(normalized)
        .layer(middleware::from_fn_with_state(state, ipacl::check))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{episode, show, shows_config};
    use crate::collection::Catalog;
    use crate::config::AppConfig;
    use crate::db::Repository;
    use crate::scanner::scan_collection;
    use crate::scanner::tests::touch;
    use crate::services::auth::create_user;
    use crate::services::idhash::id_hash;
    use crate::services::imageresize::Resizer;
    use crate::services::search::SearchIndex;
    use ipacl::IpAcl;
    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct TestServer {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
        app: Router,
        token: String,
        user_id: String,
    }

    fn config(root: &Path) -> AppConfig {
        let yaml = format!(
            "appdir: {root}\ncollections:\n  - id: movies\n    name: Movies\n    type: movies\n    directory: {root}/Movies\n",
            root = root.display()
        );
        AppConfig::build(serde_yaml::from_str(&yaml).unwrap()).unwrap()
    }

    /// A server over a scratch media tree, with `alice` logged in.
    async fn server(setup: impl FnOnce(&Path)) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Movies")).unwrap();
        setup(dir.path());

        let config = config(dir.path());
        config.ensure_dirs().await.unwrap();
        let repo = Repository::open(&config.db_path).await.unwrap();
        create_user(&repo, "alice", "pw", false).await.unwrap();

        let state = Arc::new(AppState::new(config, repo).unwrap());
        let cancel = CancellationToken::new();
        for c in state.catalog.collections() {
            scan_collection(c, &state.repo, Duration::ZERO, &cancel)
                .await
                .unwrap();
        }
        state.search.rebuild(&state.catalog).await.unwrap();

        let app = app(state.clone());
        let (status, body) = call(
            &app,
            Method::POST,
            "/Users/AuthenticateByName",
            None,
            Some(json!({"Username": "alice", "Pw": "pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        TestServer {
            _dir: dir,
            state,
            app,
            token: body["AccessToken"].as_str().unwrap().to_string(),
            user_id: body["User"]["Id"].as_str().unwrap().to_string(),
        }
    }

    async fn call_raw(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri).header(
            "X-Emby-Authorization",
            format!(
                r#"MediaBrowser Client="test", Device="box", DeviceId="d1", Version="1", Token="{}""#,
                token.unwrap_or_default()
            ),
        );
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes.to_vec())
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = call_raw(app, method, uri, token, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    impl TestServer {
        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            call(&self.app, Method::GET, uri, Some(&self.token), None).await
        }

        async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            call(&self.app, Method::POST, uri, Some(&self.token), body).await
        }
    }

    const CASABLANCA_NFO: &str = "<movie><title>Casablanca</title><year>1942</year>\
        <genre>Drama</genre><fileinfo><streamdetails><video>\
        <durationinseconds>610</durationinseconds></video></streamdetails></fileinfo></movie>";

    fn casablanca(root: &Path) {
        let dir = root.join("Movies/Casablanca (1942)");
        touch(&dir.join("casablanca.mp4"), "0123456789abcdef");
        touch(&dir.join("casablanca.nfo"), CASABLANCA_NFO);
    }

    /// A movie without metadata, so its duration is unknown.
    fn heat(root: &Path) {
        touch(&root.join("Movies/Heat (1995)/heat.mp4"), "0123");
    }

    #[tokio::test]
    async fn test_scan_and_list_movies() {
        let s = server(casablanca).await;
        let (status, body) = s
            .get(&format!(
                "/Users/{}/Items?ParentId=collection_movies&IncludeItemTypes=Movie",
                s.user_id
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["TotalRecordCount"], 1);
        let item = &body["Items"][0];
        assert_eq!(item["Name"], "Casablanca (1942)");
        assert_eq!(item["SortName"], "casablanca");
        assert_eq!(item["ProductionYear"], 1942);
        assert_eq!(item["Genres"], json!(["Drama"]));
        assert_eq!(item["Type"], "Movie");
    }

    #[tokio::test]
    async fn test_search_term_filters_listing() {
        let s = server(|root| {
            casablanca(root);
            heat(root);
        })
        .await;
        for term in ["casa", "Casablanca", "casablnca"] {
            let (status, body) = s
                .get(&format!(
                    "/Users/{}/Items?ParentId=collection_movies&SearchTerm={}",
                    s.user_id, term
                ))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["TotalRecordCount"], 1, "term {}", term);
            assert_eq!(body["Items"][0]["Name"], "Casablanca (1942)");
        }
    }

    #[tokio::test]
    async fn test_requires_auth() {
        let s = server(casablanca).await;
        let (status, body) = call(&s.app, Method::GET, "/Items", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);

        let (status, body) = call(&s.app, Method::GET, "/System/Info/Public", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Id"], s.state.config.server_id);

        let (status, _) = call(
            &s.app,
            Method::POST,
            "/Users/AuthenticateByName",
            None,
            Some(json!({"Username": "alice", "Pw": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_play_then_resume() {
        let s = server(|root| {
            casablanca(root);
            heat(root);
        })
        .await;
        let movie_id = id_hash("Heat (1995)");

        let (status, _) = s
            .post(
                "/Sessions/Playing",
                Some(json!({"ItemId": movie_id, "PositionTicks": 6_000_000_000i64})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = s.get(&format!("/Users/{}/Items/Resume", s.user_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Items"][0]["Id"], movie_id.as_str());
        assert_eq!(
            body["Items"][0]["UserData"]["PlaybackPositionTicks"],
            6_000_000_000i64
        );
    }

    #[tokio::test]
    async fn test_watched_by_percentage() {
        let s = server(casablanca).await;
        let movie_id = id_hash("Casablanca (1942)");

        let (status, _) = s
            .post(
                "/Sessions/Playing/Stopped",
                Some(json!({"ItemId": movie_id, "PositionTicks": 600_000_000_000i64})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let data = s.state.repo.get_user_data(&s.user_id, &movie_id).unwrap();
        assert!(data.played);
        assert_eq!(data.position, 0);

        let (_, body) = s.get(&format!("/Users/{}/Items/{}", s.user_id, movie_id)).await;
        assert_eq!(body["UserData"]["Played"], true);

        let (_, body) = s.get(&format!("/Users/{}/Items/Resume", s.user_id)).await;
        assert_eq!(body["TotalRecordCount"], 0);
    }

    #[tokio::test]
    async fn test_image_resize_single_decode() {
        let s = server(|root| {
            casablanca(root);
            let poster = root.join("Movies/Casablanca (1942)/casablanca-poster.jpg");
            image::RgbImage::from_pixel(600, 900, image::Rgb([200, 30, 30]))
                .save(&poster)
                .unwrap();
        })
        .await;
        let uri = format!(
            "/Items/{}/Images/Primary?w=300&h=450&q=80",
            id_hash("Casablanca (1942)")
        );

        let (a, b) = tokio::join!(
            call_raw(&s.app, Method::GET, &uri, None, None),
            call_raw(&s.app, Method::GET, &uri, None, None)
        );
        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);
        assert_eq!(a.1[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(a.2.len(), b.2.len());
        assert_eq!(s.state.resizer.decode_count(), 1);
    }

    #[tokio::test]
    async fn test_image_redirect_tag() {
        let s = server(casablanca).await;
        let (status, headers, _) = call_raw(
            &s.app,
            Method::GET,
            "/Items/x/Images/Primary?tag=redirect_https://img.example/p.jpg",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(headers[header::LOCATION], "https://img.example/p.jpg");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=2592000");
    }

    #[tokio::test]
    async fn test_normalized_request() {
        let s = server(casablanca).await;
        let (status, body) = s.get("/emby/items?parentid=collection_movies").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["TotalRecordCount"], 1);

        let (status, _) = s.get("//EMBY/system/INFO/").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stream_range() {
        let s = server(casablanca).await;
        let uri = format!(
            "/Videos/{}/stream?static=true&api_key={}",
            id_hash("Casablanca (1942)"),
            s.token
        );
        let req = Request::builder()
            .uri(&uri)
            .header(header::RANGE, "bytes=4-7")
            .body(Body::empty())
            .unwrap();
        let response = s.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 4-7/16");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"4567");
    }

    async fn next_up_ids(app: &Router, token: &str) -> Vec<String> {
        let (_, body) = call(app, Method::GET, "/Shows/NextUp", Some(token), None).await;
        body["Items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["Id"].as_str().unwrap().to_string())
            .collect()
    }

    async fn watch(app: &Router, token: &str, id: &str) {
        let uri = format!("/UserPlayedItems/{id}");
        let (status, _) = call(app, Method::POST, &uri, Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        // Keep the watch order distinguishable.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn test_next_up_progression() {
        let s = server(|_| {}).await;
        let catalog = Catalog::new(&[shows_config("TV")]);
        catalog.collections()[0].publish(vec![show("S", &[(1, 2), (2, 1)])]);
        let state = Arc::new(AppState {
            config: s.state.config.clone(),
            catalog: Arc::new(catalog),
            repo: s.state.repo.clone(),
            resizer: Resizer::new(s.state.config.cache_dir.clone()),
            search: Arc::new(SearchIndex::new(s.state.repo.clone())),
            ipacl: IpAcl::default(),
        });
        let app = app(state);
        let ep = |season: i32, number: i32| format!("episode_{}", episode("S", season, number).id);

        watch(&app, &s.token, &ep(1, 1)).await;
        assert_eq!(next_up_ids(&app, &s.token).await, vec![ep(1, 2)]);
        watch(&app, &s.token, &ep(1, 2)).await;
        assert_eq!(next_up_ids(&app, &s.token).await, vec![ep(2, 1)]);
        watch(&app, &s.token, &ep(2, 1)).await;
        assert!(next_up_ids(&app, &s.token).await.is_empty());
    }

    #[tokio::test]
    async fn test_playlist_crud() {
        let s = server(casablanca).await;
        let movie_id = id_hash("Casablanca (1942)");

        let (status, body) = s
            .post(
                "/Playlists",
                Some(json!({"Name": "Classics", "Ids": [movie_id, "missing"]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let playlist_id = body["Id"].as_str().unwrap().to_string();

        let (_, body) = s.get(&format!("/Playlists/{playlist_id}/Items")).await;
        assert_eq!(body["TotalRecordCount"], 1);
        assert_eq!(body["Items"][0]["Id"], movie_id.as_str());

        let (_, body) = s.get("/Items?IncludeItemTypes=Playlist&Recursive=true").await;
        assert_eq!(body["Items"][0]["Name"], "Classics");

        let (status, _) = call(
            &s.app,
            Method::DELETE,
            &format!("/Playlists/{playlist_id}/Items?entryIds={movie_id}"),
            Some(&s.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = s.get(&format!("/Playlists/{playlist_id}")).await;
        assert_eq!(body["ItemIds"], json!([]));

        let (status, _) = call(
            &s.app,
            Method::DELETE,
            &format!("/Items/{playlist_id}"),
            Some(&s.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = s.get(&format!("/Playlists/{playlist_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_devices() {
        let s = server(casablanca).await;
        let (_, body) = s.get("/Devices").await;
        assert_eq!(body["Items"][0]["Id"], "d1");

        let (status, _) = s.get("/Devices/Info?id=unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&s.app, Method::DELETE, "/Devices?id=d1", Some(&s.token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        // The token that made the call is gone with its device.
        let (status, _) = s.get("/Devices").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
