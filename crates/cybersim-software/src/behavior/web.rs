//! Web server and browser.

use crate::{InboundMessage, SoftwareCore, SoftwareHealth};
use cybersim_common::RequestResponse;
use cybersim_packet::{HttpMethod, HttpPacket, HttpStatusCode, Payload, Port};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use tracing::debug;

/// Answers HTTP requests.
#[derive(Debug, Clone, Default)]
pub struct WebServer {
    requests_served: u64,
}

impl WebServer {
    pub(crate) fn accepts(payload: &Payload) -> bool {
        matches!(payload, Payload::Http(HttpPacket::Request { .. }))
    }

    pub(crate) fn receive(&mut self, core: &mut SoftwareCore, msg: &InboundMessage) {
        let Payload::Http(HttpPacket::Request { method, url }) = &msg.payload else {
            return;
        };
        let status = match (core.health_actual(), method) {
            (SoftwareHealth::Compromised | SoftwareHealth::Overwhelmed, _) => {
                HttpStatusCode::InternalServerError
            }
            (_, HttpMethod::Get) => HttpStatusCode::Ok,
            (_, HttpMethod::Post) => HttpStatusCode::MethodNotAllowed,
        };
        self.requests_served += 1;
        let response = HttpPacket::Response {
            status,
            url: url.clone(),
        };
        core.send(msg.src_ip, msg.src_port, Payload::Http(response));
    }

    pub(crate) fn describe_state(&self) -> Value {
        json!({ "requests_served": self.requests_served })
    }
}

/// One page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserHistoryItem {
    /// URL requested.
    pub url: String,
    /// Status code received, `None` if nothing came back.
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
enum BrowserStage {
    Idle,
    Resolving {
        url: String,
        domain: String,
        queried: bool,
    },
    Requesting {
        url: String,
        status: Option<HttpStatusCode>,
    },
}

/// Fetches URLs, resolving host names through the node's DNS client.
#[derive(Debug, Clone)]
pub struct WebBrowser {
    target_url: Option<String>,
    history: Vec<BrowserHistoryItem>,
    stage: BrowserStage,
}

/// Host part of `http://host[:port]/path`.
fn url_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let host = rest.split('/').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

impl WebBrowser {
    pub(crate) fn new(target_url: Option<String>) -> Self {
        WebBrowser {
            target_url,
            history: Vec::new(),
            stage: BrowserStage::Idle,
        }
    }

    /// Fetch history, oldest first.
    pub fn history(&self) -> &[BrowserHistoryItem] {
        &self.history
    }

    pub(crate) fn accepts(&self, payload: &Payload) -> bool {
        match (&self.stage, payload) {
            (
                BrowserStage::Requesting { url, .. },
                Payload::Http(HttpPacket::Response { url: answered, .. }),
            ) => url == answered,
            _ => false,
        }
    }

    pub(crate) fn receive(&mut self, msg: &InboundMessage) {
        if let (
            BrowserStage::Requesting { status, .. },
            Payload::Http(HttpPacket::Response { status: got, .. }),
        ) = (&mut self.stage, &msg.payload)
        {
            *status = Some(*got);
        }
    }

    pub(crate) fn execute(&mut self, core: &mut SoftwareCore, args: &[String]) -> RequestResponse {
        let Some(url) = args.first().cloned().or_else(|| self.target_url.clone()) else {
            return RequestResponse::failure("no target url");
        };
        let Some(host) = url_host(&url) else {
            return RequestResponse::failure(format!("invalid url: {}", url));
        };
        match host.parse::<Ipv4Addr>() {
            Ok(address) => self.request(core, url.clone(), address),
            Err(_) => {
                self.stage = BrowserStage::Resolving {
                    domain: host.to_string(),
                    url: url.clone(),
                    queried: false,
                };
            }
        }
        RequestResponse::pending()
    }

    fn request(&mut self, core: &mut SoftwareCore, url: String, address: Ipv4Addr) {
        let request = HttpPacket::Request {
            method: HttpMethod::Get,
            url: url.clone(),
        };
        core.send(address, Port::HTTP, Payload::Http(request));
        self.stage = BrowserStage::Requesting { url, status: None };
    }

    pub(crate) fn pending_domain(&self) -> Option<(String, bool)> {
        match &self.stage {
            BrowserStage::Resolving {
                domain, queried, ..
            } => Some((domain.clone(), *queried)),
            _ => None,
        }
    }

    /// Continue after a resolution attempt. `sent` is true when a DNS query
    /// has just been sent on the browser's behalf.
    pub(crate) fn resolved(
        &mut self,
        core: &mut SoftwareCore,
        address: Option<Ipv4Addr>,
        sent: bool,
    ) -> RequestResponse {
        let BrowserStage::Resolving { url, domain, .. } = self.stage.clone() else {
            return RequestResponse::failure("nothing outstanding");
        };
        match address {
            Some(address) => {
                self.request(core, url, address);
                RequestResponse::pending()
            }
            None if sent => {
                self.stage = BrowserStage::Resolving {
                    url,
                    domain,
                    queried: true,
                };
                RequestResponse::pending()
            }
            None => {
                debug!(domain = %domain, "browser could not resolve domain");
                self.history.push(BrowserHistoryItem { url, status: None });
                self.stage = BrowserStage::Idle;
                RequestResponse::failure(format!("could not resolve {}", domain))
            }
        }
    }

    pub(crate) fn poll(&mut self) -> RequestResponse {
        let stage = std::mem::replace(&mut self.stage, BrowserStage::Idle);
        let BrowserStage::Requesting { url, status } = stage else {
            return RequestResponse::failure("nothing outstanding");
        };
        self.history.push(BrowserHistoryItem {
            url,
            status: status.map(HttpStatusCode::code),
        });
        match status {
            Some(HttpStatusCode::Ok) => RequestResponse::success().with_data("status", 200),
            Some(code) => RequestResponse::failure(format!("http status {}", code))
                .with_data("status", code.code()),
            None => RequestResponse::failure("no response from web server"),
        }
    }

    pub(crate) fn describe_state(&self) -> Value {
        json!({
            "target_url": self.target_url,
            "history": self.history,
        })
    }
}
