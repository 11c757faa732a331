//! 请求与结果模型
//!
//! 入站请求除路由与模型绑定所需的部分外一律视为不透明数据；
//! 对外结果不携带任何传输编码，状态码映射由外部协作方负责。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::container::CapabilityObject;
use crate::validation::Violation;

/// HTTP方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// 大小写不敏感地解析方法名，未知方法返回None
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 入站请求
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: Value::Null,
            headers: HashMap::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// 绑定到处理器输入模型后的请求
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub path_params: HashMap<String, String>,
    pub body: Value,
    pub headers: HashMap<String, String>,
}

impl BoundRequest {
    /// 按名称取路径参数
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }
}

/// 一次分发的对外结果
///
/// 具体传输编码（状态码等）由外部协作方决定。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// 处理器成功返回的载荷
    Success { payload: Value },
    /// 无匹配路由
    NotFound,
    /// 输入模型校验失败，携带全部违规
    Invalid { violations: Vec<Violation> },
    /// 执行失败（容器错误、处理器错误或恐慌），不泄露内部细节
    Failed,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 请求处理器契约
///
/// 处理器经由容器解析获得，其依赖在同一作用域内构造。
/// 业务失败通过 `anyhow::Error` 上抛，由分发器统一转译。
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: BoundRequest) -> Result<Value, anyhow::Error>;
}

/// 容器中存放处理器所用的共享指针类型
pub type SharedHandler = Arc<dyn RequestHandler>;

/// 将处理器实例擦除为可注册的能力实例
pub fn handler_object<H: RequestHandler + 'static>(handler: H) -> CapabilityObject {
    let shared: SharedHandler = Arc::new(handler);
    Arc::new(shared)
}

/// 将已共享的处理器擦除为可注册的能力实例
pub fn shared_handler_object(handler: SharedHandler) -> CapabilityObject {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parse() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("POST"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::parse("BREW"), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = DispatchOutcome::Invalid {
            violations: vec![Violation {
                field: "name".to_string(),
                message: "field 'name' is required".to_string(),
            }],
        };
        let encoded = serde_json::to_value(&outcome).unwrap();
        assert_eq!(encoded["outcome"], "invalid");
        assert_eq!(encoded["violations"][0]["field"], "name");

        let success = DispatchOutcome::Success {
            payload: json!({"id": 1}),
        };
        assert!(success.is_success());
    }

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: BoundRequest) -> Result<Value, anyhow::Error> {
            Ok(json!({ "id": request.param("id") }))
        }
    }

    #[tokio::test]
    async fn test_handler_object_round_trip() {
        let object = handler_object(EchoHandler);
        let handler = object.downcast_ref::<SharedHandler>().unwrap().clone();
        let bound = BoundRequest {
            path_params: HashMap::from([("id".to_string(), "9".to_string())]),
            body: Value::Null,
            headers: HashMap::new(),
        };
        let value = handler.handle(bound).await.unwrap();
        assert_eq!(value, json!({ "id": "9" }));
    }
}
