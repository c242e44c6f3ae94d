#![allow(dead_code)]

use reqwest::{header, redirect::Policy, Client, Response, StatusCode};
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;
use yatube::{
    api::{build_router, AppState},
    config::{Bootstrap, Config},
};

pub const SMALL_GIF: &[u8] = b"\x47\x49\x46\x38\x39\x61\x01\x00\x01\x00\x00\x00\x00\x21\xf9\x04\x01\x0a\x00\x01\x00\x2c\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02\x4c\x01\x00\x3b";

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: JoinHandle<()>,
    pub state: AppState,
    pub client: Client,
    _tmp: tempfile::TempDir,
}

pub async fn spawn_server() -> TestServer {
    spawn_with(None, 10).await
}

pub async fn spawn_with(bootstrap: Option<Bootstrap>, page_size: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        max_upload_mb: 1,
        logging_enabled: false,
        bootstrap,
        page_size,
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    let client = Client::builder().redirect(Policy::none()).build().unwrap();
    TestServer {
        addr,
        server,
        state,
        client,
        _tmp: tmp,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Sign up `username` and return the `sessionid=...` cookie pair.
    pub async fn signup(&self, username: &str) -> String {
        let resp = self
            .client
            .post(self.url("/auth/signup/"))
            .form(&[
                ("username", username),
                ("first_name", "First"),
                ("last_name", "Last"),
                ("password", "password123"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        session_cookie(&resp)
    }

    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.client
            .post(self.url("/auth/login/"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        let mut req = self.client.get(self.url(path));
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        req.send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str, cookie: Option<&str>) -> serde_json::Value {
        let resp = self.get(path, cookie).await;
        assert_eq!(resp.status(), StatusCode::OK, "GET {}", path);
        resp.json().await.unwrap()
    }

    pub async fn post_form(&self, path: &str, cookie: &str, form: &[(&str, &str)]) -> Response {
        self.client
            .post(self.url(path))
            .header(header::COOKIE, cookie)
            .form(form)
            .send()
            .await
            .unwrap()
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        cookie: &str,
        form: reqwest::multipart::Form,
    ) -> Response {
        self.client
            .post(self.url(path))
            .header(header::COOKIE, cookie)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Publish a text post, optionally in a group, and return its id.
    pub async fn publish(&self, cookie: &str, text: &str, group: Option<i64>) -> i64 {
        let mut form = reqwest::multipart::Form::new().text("text", text.to_string());
        if let Some(g) = group {
            form = form.text("group", g.to_string());
        }
        let resp = self.post_multipart("/new/", cookie, form).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
        let v = self.get_json("/", None).await;
        v["page"]["items"][0]["id"].as_i64().unwrap()
    }

    pub fn create_group(&self, title: &str, slug: &str) -> i64 {
        let conn = self.state.pool.get().unwrap();
        yatube::groups::create_group(&conn, title, Some(slug), "").unwrap().id
    }
}

pub fn session_cookie(resp: &Response) -> String {
    let raw = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().to_string()
}

pub fn location(resp: &Response) -> String {
    resp.headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

pub fn texts(page: &serde_json::Value) -> Vec<String> {
    page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["text"].as_str().unwrap().to_string())
        .collect()
}
