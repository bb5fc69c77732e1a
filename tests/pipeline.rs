//! End-to-end `CacheLayer` request/response cycles against a bare
//! `tower::service_fn` origin, grounded in the teacher's
//! `http-cache-tower-server/tests/integration.rs` style (narrowed to a plain
//! `tower::service_fn`, since this crate takes no axum dependency).

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use http_cache_pipeline::store::memory::MemoryStore;
use http_cache_pipeline::{CacheLayer, ForcePass};
use tower::{Service, ServiceBuilder, ServiceExt};

fn get(path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method("GET")
        .uri(format!("http://www.example.com{path}"))
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn header<'a, B>(res: &'a Response<B>, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn first_get_misses_second_get_is_served_fresh() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_origin = hits.clone();
    let origin = tower::service_fn(move |_req: Request<Full<Bytes>>| {
        let hits = hits_for_origin.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(
                Response::builder()
                    .status(200)
                    .header("Cache-Control", "public, max-age=60")
                    .body(Full::new(Bytes::from_static(b"Hi")))
                    .unwrap(),
            )
        }
    });

    let store = MemoryStore::default();
    let mut svc =
        ServiceBuilder::new().layer(CacheLayer::new(store.clone(), store)).service(origin);

    let res1 = svc.ready().await.unwrap().call(get("/")).await.unwrap();
    assert_eq!(header(&res1, "x-plug-cache"), Some("miss"));
    assert!(header(&res1, "age").is_some(), "Fetch stamps Age on the stored response too");

    let res2 = svc.ready().await.unwrap().call(get("/")).await.unwrap();
    assert_eq!(header(&res2, "x-plug-cache"), Some("fresh"));
    assert!(header(&res2, "age").is_some());

    assert_eq!(hits.load(Ordering::SeqCst), 1, "origin must not be re-invoked on a fresh hit");
}

#[tokio::test]
async fn post_invalidates_and_always_passes_through() {
    let origin = tower::service_fn(|_req: Request<Full<Bytes>>| async {
        Ok::<_, Infallible>(Response::builder().status(200).body(Full::new(Bytes::new())).unwrap())
    });

    let store = MemoryStore::default();
    let mut svc =
        ServiceBuilder::new().layer(CacheLayer::new(store.clone(), store)).service(origin);

    let req = Request::builder()
        .method("POST")
        .uri("http://www.example.com/")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = svc.ready().await.unwrap().call(req).await.unwrap();

    assert_eq!(header(&res, "x-plug-cache"), Some("invalidate, pass"));
    assert!(header(&res, "age").is_none());
}

#[tokio::test]
async fn force_pass_extension_bypasses_the_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_origin = hits.clone();
    let origin = tower::service_fn(move |_req: Request<Full<Bytes>>| {
        let hits = hits_for_origin.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(
                Response::builder()
                    .status(200)
                    .header("Cache-Control", "public, max-age=60")
                    .body(Full::new(Bytes::from_static(b"Hi")))
                    .unwrap(),
            )
        }
    });

    let store = MemoryStore::default();
    let mut svc =
        ServiceBuilder::new().layer(CacheLayer::new(store.clone(), store)).service(origin);

    for _ in 0..2 {
        let mut req = get("/forced");
        req.extensions_mut().insert(ForcePass(true));
        let res = svc.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(header(&res, "x-plug-cache"), Some("pass"));
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2, "force_pass must never serve from, or write to, the cache");
}

#[tokio::test]
async fn conditional_get_against_a_stale_variant_short_circuits_to_304() {
    let call_count = Arc::new(AtomicUsize::new(0));
    let count_for_origin = call_count.clone();
    let origin = tower::service_fn(move |req: Request<Full<Bytes>>| {
        let call_count = count_for_origin.clone();
        async move {
            let n = call_count.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Initial fetch: short max-age so the second request finds
                // it stale but validateable.
                return Ok::<_, Infallible>(
                    Response::builder()
                        .status(200)
                        .header("Cache-Control", "public, max-age=0")
                        .header("ETag", "\"v1\"")
                        .body(Full::new(Bytes::from_static(b"Hi")))
                        .unwrap(),
                );
            }
            // Revalidation: the origin recognizes the conditional request
            // and reports no change.
            assert!(req.headers().get("if-none-match").is_some());
            Ok(Response::builder().status(304).body(Full::new(Bytes::new())).unwrap())
        }
    });

    let store = MemoryStore::default();
    let mut svc =
        ServiceBuilder::new().layer(CacheLayer::new(store.clone(), store)).service(origin);

    let res1 = svc.ready().await.unwrap().call(get("/doc")).await.unwrap();
    assert_eq!(header(&res1, "x-plug-cache"), Some("miss"));

    // max-age=0 reads as stale immediately (ttl == 0 is not > 0).
    let res2 = svc.ready().await.unwrap().call(get("/doc")).await.unwrap();
    assert_eq!(header(&res2, "x-plug-cache"), Some("stale, valid"));
    assert_eq!(res2.status(), 200, "a successful revalidation merges into the stored variant");

    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn vary_separates_variants_by_selected_request_header() {
    let origin = tower::service_fn(|req: Request<Full<Bytes>>| async move {
        let lang = req
            .headers()
            .get("accept-language")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("en")
            .to_string();
        Ok::<_, Infallible>(
            Response::builder()
                .status(200)
                .header("Cache-Control", "public, max-age=60")
                .header("Vary", "Accept-Language")
                .body(Full::new(Bytes::from(lang)))
                .unwrap(),
        )
    });

    let store = MemoryStore::default();
    let mut svc =
        ServiceBuilder::new().layer(CacheLayer::new(store.clone(), store)).service(origin);

    let mut req_en = get("/doc");
    req_en.headers_mut().insert("accept-language", "en".parse().unwrap());
    let res_en = svc.ready().await.unwrap().call(req_en).await.unwrap();
    assert_eq!(header(&res_en, "x-plug-cache"), Some("miss"));

    let mut req_fr = get("/doc");
    req_fr.headers_mut().insert("accept-language", "fr".parse().unwrap());
    let res_fr = svc.ready().await.unwrap().call(req_fr).await.unwrap();
    assert_eq!(header(&res_fr, "x-plug-cache"), Some("miss"), "a distinct Vary value is its own miss");

    let mut req_en_again = get("/doc");
    req_en_again.headers_mut().insert("accept-language", "en".parse().unwrap());
    let res_en_again = svc.ready().await.unwrap().call(req_en_again).await.unwrap();
    assert_eq!(header(&res_en_again, "x-plug-cache"), Some("fresh"));
}
