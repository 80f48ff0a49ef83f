//! Script-visible request object (`spec.md` §4.E `context()`, §6 "Script-
//! visible HTTP protocol").

use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: IndexMap<String, String>,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

impl RequestContext {
    /// `{method, path, query, headers, body}`, with `body` parsed into an
    /// object when `Content-Type` is `application/json` (`spec.md` §6).
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("method".to_string(), Value::string(self.method.clone()));
        map.insert("path".to_string(), Value::string(self.path.clone()));

        let mut query = IndexMap::new();
        for (k, v) in &self.query {
            query.insert(k.clone(), Value::string(v.clone()));
        }
        map.insert("query".to_string(), Value::object(query));

        let mut headers = IndexMap::new();
        for (k, v) in &self.headers {
            headers.insert(k.clone(), Value::string(v.clone()));
        }
        map.insert("headers".to_string(), Value::object(headers));

        let is_json = self
            .headers
            .get("content-type")
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let body = if is_json {
            serde_json::from_str::<serde_json::Value>(&self.body)
                .map(|json| Value::from_json(&json))
                .unwrap_or_else(|_| Value::string(self.body.clone()))
        } else {
            Value::string(self.body.clone())
        };
        map.insert("body".to_string(), body);

        Value::object(map)
    }
}

/// A script handler's `exit({status, headers, body})` response object
/// (`spec.md` §6). Default `status` is 200; default `Content-Type` is
/// `application/json` when `body` is an object/array, else `text/plain`.
pub struct ScriptResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

impl ScriptResponse {
    pub async fn from_value(value: &Value) -> Self {
        let Value::Object(obj) = value else {
            return Self::plain_text(200, &value.to_display_string().await);
        };
        let guard = obj.read().await;
        let status = guard.get("status").map(|v| v.to_number() as u16).filter(|s| *s != 0).unwrap_or(200);
        let body_value = guard.get("body").cloned().unwrap_or(Value::Nil);
        let is_structured = matches!(body_value, Value::Array(_) | Value::Object(_));
        let body = if is_structured {
            body_value.to_json_string().await
        } else {
            body_value.to_display_string().await
        };
        let mut headers = IndexMap::new();
        if let Some(Value::Object(h)) = guard.get("headers") {
            for (k, v) in h.read().await.iter() {
                headers.insert(k.clone(), v.to_display_string().await);
            }
        }
        if !headers.contains_key("content-type") {
            headers.insert(
                "content-type".to_string(),
                if is_structured { "application/json".to_string() } else { "text/plain".to_string() },
            );
        }
        Self { status, headers, body }
    }

    fn plain_text(status: u16, body: &str) -> Self {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Self { status, headers, body: body.to_string() }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::plain_text(status, message)
    }
}
