//! Request and response values exchanged with the application layer.

use std::collections::HashMap;

use bytes::Bytes;

use crate::hpack::HeaderField;

/// Hop-by-hop headers that HTTP/2 forbids (RFC 9113 Section 8.2.2).
const CONNECTION_SPECIFIC: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// A request reassembled from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    /// `:path` up to the first `?`.
    pub uri: String,
    /// `:path` after the first `?`, without it.
    pub raw_query: String,
    /// Regular headers, names lowercased. Repeated fields are combined.
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Map decoded fields onto a request, validating the pseudo-header set.
    ///
    /// Rejects duplicate or unknown pseudo-headers, pseudo-headers after a
    /// regular field, and missing mandatory ones.
    pub fn from_fields(fields: &[HeaderField], body: Bytes) -> Result<Self, String> {
        let mut req = Request {
            body,
            ..Request::default()
        };
        let mut seen = PseudoSeen::default();
        let mut regular_seen = false;

        for field in fields {
            let name = String::from_utf8_lossy(&field.name);
            let value = String::from_utf8_lossy(&field.value).into_owned();

            if field.is_pseudo() {
                if regular_seen {
                    return Err(format!("pseudo-header {} after regular header", name));
                }
                let slot = match name.as_ref() {
                    ":method" => &mut seen.method,
                    ":scheme" => &mut seen.scheme,
                    ":authority" => &mut seen.authority,
                    ":path" => &mut seen.path,
                    other => return Err(format!("unknown request pseudo-header {}", other)),
                };
                if std::mem::replace(slot, true) {
                    return Err(format!("duplicate pseudo-header {}", name));
                }
                match name.as_ref() {
                    ":method" => req.method = value,
                    ":scheme" => req.scheme = value,
                    ":authority" => req.authority = value,
                    _ => {
                        if value.is_empty() {
                            return Err("empty :path".to_string());
                        }
                        match value.split_once('?') {
                            Some((uri, query)) => {
                                req.uri = uri.to_string();
                                req.raw_query = query.to_string();
                            }
                            None => req.uri = value,
                        }
                    }
                }
            } else {
                regular_seen = true;
                insert_combined(&mut req.headers, name.to_ascii_lowercase(), value);
            }
        }

        if !seen.method {
            return Err("missing :method".to_string());
        }
        if req.method == "CONNECT" {
            if !seen.authority || seen.scheme || seen.path {
                return Err("CONNECT requires :authority only".to_string());
            }
        } else if !seen.scheme || !seen.path {
            return Err("missing :scheme or :path".to_string());
        }

        Ok(req)
    }

    /// Attach a trailing header block. Pseudo-headers are not allowed there.
    pub(crate) fn set_trailers(&mut self, fields: &[HeaderField]) -> Result<(), String> {
        for field in fields {
            if field.is_pseudo() {
                return Err("pseudo-header in trailers".to_string());
            }
            insert_combined(
                &mut self.trailers,
                String::from_utf8_lossy(&field.name).to_ascii_lowercase(),
                String::from_utf8_lossy(&field.value).into_owned(),
            );
        }
        Ok(())
    }
}

#[derive(Default)]
struct PseudoSeen {
    method: bool,
    scheme: bool,
    authority: bool,
    path: bool,
}

fn insert_combined(map: &mut HashMap<String, String>, name: String, value: String) {
    let separator = if name == "cookie" { "; " } else { ", " };
    map.entry(name)
        .and_modify(|existing| {
            existing.push_str(separator);
            existing.push_str(&value);
        })
        .or_insert(value);
}

/// A response handed back by the application for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header fields as they go into HPACK: `:status` first, names lowercased,
    /// connection-specific headers dropped.
    pub fn header_fields(&self) -> Vec<HeaderField> {
        let mut fields = Vec::with_capacity(self.headers.len() + 1);
        fields.push(HeaderField::new(":status", self.status.to_string()));
        for (name, value) in &self.headers {
            let name = name.to_ascii_lowercase();
            if CONNECTION_SPECIFIC.contains(&name.as_str()) {
                continue;
            }
            fields.push(HeaderField::new(name, value.clone()));
        }
        fields
    }
}
