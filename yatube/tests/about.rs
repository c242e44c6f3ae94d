use hyper::{header, Client, StatusCode, Uri};
use std::net::TcpListener;
use yatube::embed::about_router;

#[tokio::test]
async fn serves_about_pages_as_html() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(about_router().into_make_service())
            .await
            .unwrap();
    });

    let client = Client::new();
    for path in ["/about/author/", "/about/tech/"] {
        let uri: Uri = format!("http://{}{}", addr, path).parse().unwrap();
        let resp = client.get(uri).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(ct, "text/html; charset=utf-8");
    }

    let uri: Uri = format!("http://{}/about/nothing/", addr).parse().unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    server.abort();
}
