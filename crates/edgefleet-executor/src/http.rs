//! HTTP probes against node-hosted endpoints.

use std::net::IpAddr;
use std::time::Duration;

use edgefleet_registry::Node;
use reqwest::{Client, Method};
use url::Url;

use crate::request::{HttpMethod, HttpProbe};
use crate::transport::{HttpResponse, TransportError};

#[derive(Debug, Clone)]
pub struct HttpClient {
  client: Client,
}

impl HttpClient {
  pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
    let client = Client::builder()
      .connect_timeout(connect_timeout)
      .build()
      .map_err(|e| TransportError::Other(format!("failed to build http client: {}", e)))?;
    Ok(Self { client })
  }

  pub async fn send(&self, node: &Node, probe: &HttpProbe) -> Result<HttpResponse, TransportError> {
    let url = probe_url(node, probe)?;
    let method = match probe.method {
      HttpMethod::Get => Method::GET,
      HttpMethod::Post => Method::POST,
    };

    let mut request = self.client.request(method, url);
    if let Some(body) = &probe.body {
      request = request.json(body);
    }

    let response = request.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(classify)?;

    Ok(HttpResponse { status, body })
  }
}

fn probe_url(node: &Node, probe: &HttpProbe) -> Result<Url, TransportError> {
  let invalid = |reason: String| TransportError::Other(format!("invalid endpoint for {}: {}", node.name, reason));
  let mut url = Url::parse("http://localhost/").map_err(|e| invalid(e.to_string()))?;
  // A bare IPv6 literal is not a valid host string; it needs brackets.
  match node.address.parse::<IpAddr>() {
    Ok(ip) => url.set_ip_host(ip).map_err(|_| invalid(node.address.clone()))?,
    Err(_) => url.set_host(Some(node.address.as_str())).map_err(|e| invalid(e.to_string()))?,
  }
  url
    .set_port(Some(probe.port))
    .map_err(|_| invalid(format!("port {}", probe.port)))?;
  match probe.path.split_once('?') {
    Some((path, query)) => {
      url.set_path(path);
      url.set_query(Some(query));
    }
    None => url.set_path(&probe.path),
  }
  Ok(url)
}

fn classify(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout(err.to_string())
  } else if err.is_connect() {
    TransportError::Connect(err.to_string())
  } else {
    TransportError::Other(err.to_string())
  }
}
