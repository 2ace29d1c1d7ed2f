use std::time::Duration;

use reqwest::{header, Client, Response};

use crate::api::Problem;

pub(crate) type ReqResult<T> = std::result::Result<T, Problem>;

pub(crate) fn default_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("acme-obtain/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub(crate) async fn req_get(client: &Client, url: &str) -> reqwest::Result<Response> {
    log::trace!("GET {url}");
    client.get(url).send().await
}

pub(crate) async fn req_post(client: &Client, url: &str, body: String) -> reqwest::Result<Response> {
    log::trace!("POST {url} {body}");
    client
        .post(url)
        .header(header::CONTENT_TYPE, "application/jose+json")
        .body(body)
        .send()
        .await
}

pub(crate) async fn req_handle_error(res: Response) -> ReqResult<Response> {
    // ok responses pass through
    if res.status().is_success() {
        return Ok(res);
    }

    let is_problem = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/problem+json"));

    let problem = if is_problem {
        // if we were sent a problem+json, deserialize it
        let body = req_safe_read_body(res).await;
        serde_json::from_str(&body).unwrap_or_else(|err| Problem {
            _type: "problemJsonFail".to_owned(),
            detail: Some(format!(
                "Failed to deserialize application/problem+json ({err}) body: {body}"
            )),
            subproblems: None,
        })
    } else {
        // some other problem
        let status = res.status();
        let body = req_safe_read_body(res).await;
        Problem {
            _type: "httpReqError".to_owned(),
            detail: Some(format!("{status} body: {body}")),
            subproblems: None,
        }
    };

    Err(problem)
}

pub(crate) fn req_header(res: &Response, name: &str) -> Option<String> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

pub(crate) fn req_expect_header(res: &Response, name: &'static str) -> crate::Result<String> {
    req_header(res, name).ok_or(crate::Error::MissingHeader(name))
}

pub(crate) async fn req_safe_read_body(res: Response) -> String {
    // letsencrypt sometimes closes the TLS abruptly causing io error
    // even though we did capture the body.
    res.text().await.unwrap_or_default()
}
