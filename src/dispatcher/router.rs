//! 路由表与路径匹配
//!
//! 路径模式由字面段与 `{name}` 参数段组成。
//! 匹配采用最长特异性优先：逐段比较时字面段优先于参数段，
//! 特异性完全相同的并列由先注册者胜出。

use std::collections::HashMap;

use crate::container::CapabilityId;
use crate::errors::RouteError;
use crate::validation::RuleSet;

use super::request::HttpMethod;

/// 路径段
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

/// 解析后的路径模式
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// 解析 `/products/{id}` 形式的模式
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("pattern must start with '/'"));
        }

        let mut segments = Vec::new();
        let mut seen_params: Vec<&str> = Vec::new();
        for part in pattern.trim_matches('/').split('/') {
            if part.is_empty() {
                continue;
            }
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(invalid("parameter segment has no name"));
                }
                if seen_params.contains(&name) {
                    return Err(invalid("duplicate parameter name"));
                }
                seen_params.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains('{') || part.contains('}') {
                return Err(invalid("braces are only allowed as a whole segment"));
            } else {
                segments.push(Segment::Static(part.to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 匹配具体路径，成功时返回提取出的命名参数
    fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if self.segments.len() != path.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(path.iter()) {
            match segment {
                Segment::Static(text) => {
                    if text != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }

    /// 特异性键：逐段0=字面、1=参数，字典序越小越特异
    fn specificity(&self) -> Vec<u8> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Static(_) => 0,
                Segment::Param(_) => 1,
            })
            .collect()
    }

    /// 模式形状，用于重复注册检测（参数名不参与比较）
    fn shape(&self) -> String {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Static(text) => text.as_str(),
                Segment::Param(_) => "{}",
            })
            .collect();
        format!("/{}", parts.join("/"))
    }
}

/// 路由描述：方法 + 模式 + 处理器能力标识 + 可选规则集
pub struct RouteDescriptor {
    method: HttpMethod,
    pattern: RoutePattern,
    handler: CapabilityId,
    rules: Option<RuleSet>,
}

impl RouteDescriptor {
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn handler(&self) -> &CapabilityId {
        &self.handler
    }

    pub fn rules(&self) -> Option<&RuleSet> {
        self.rules.as_ref()
    }
}

/// 启动期装配、服务期只读的路由表
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由；方法与模式形状都相同的重复注册报错
    pub fn add(
        &mut self,
        method: HttpMethod,
        pattern: RoutePattern,
        handler: CapabilityId,
        rules: Option<RuleSet>,
    ) -> Result<(), RouteError> {
        let shape = pattern.shape();
        if self
            .routes
            .iter()
            .any(|route| route.method == method && route.pattern.shape() == shape)
        {
            return Err(RouteError::DuplicateRoute {
                method: method.to_string(),
                pattern: pattern.raw().to_string(),
            });
        }
        self.routes.push(RouteDescriptor {
            method,
            pattern,
            handler,
            rules,
        });
        Ok(())
    }

    /// 查找最特异的匹配路由
    pub fn find(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Option<(&RouteDescriptor, HashMap<String, String>)> {
        let segments = split_path(path);
        let mut best: Option<(&RouteDescriptor, HashMap<String, String>, Vec<u8>)> = None;
        for route in self.routes.iter().filter(|r| r.method == method) {
            if let Some(params) = route.pattern.matches(&segments) {
                let specificity = route.pattern.specificity();
                let better = match &best {
                    // 并列时保留先注册者
                    Some((_, _, current)) => specificity < *current,
                    None => true,
                };
                if better {
                    best = Some((route, params, specificity));
                }
            }
        }
        best.map(|(route, params, _)| (route, params))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(routes: &[(&str, &str)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (pattern, handler) in routes {
            table
                .add(
                    HttpMethod::Get,
                    RoutePattern::parse(pattern).unwrap(),
                    CapabilityId::new(*handler),
                    None,
                )
                .unwrap();
        }
        table
    }

    #[test]
    fn test_parse_rejects_malformed_patterns() {
        assert!(RoutePattern::parse("products").is_err());
        assert!(RoutePattern::parse("/products/{}").is_err());
        assert!(RoutePattern::parse("/products/{id}/{id}").is_err());
        assert!(RoutePattern::parse("/pro{ducts}x").is_err());
        assert!(RoutePattern::parse("/").is_ok());
    }

    #[test]
    fn test_param_extraction() {
        let table = table_with(&[("/users/{user_id}/orders/{order_id}", "order_handler")]);
        let (route, params) = table
            .find(HttpMethod::Get, "/users/7/orders/42")
            .expect("route should match");
        assert_eq!(route.handler().as_str(), "order_handler");
        assert_eq!(params["user_id"], "7");
        assert_eq!(params["order_id"], "42");
    }

    #[test]
    fn test_literal_beats_parameter() {
        let table = table_with(&[
            ("/products/{id}", "detail_handler"),
            ("/products/featured", "featured_handler"),
        ]);

        let (route, params) = table.find(HttpMethod::Get, "/products/featured").unwrap();
        assert_eq!(route.handler().as_str(), "featured_handler");
        assert!(params.is_empty());

        let (route, params) = table.find(HttpMethod::Get, "/products/42").unwrap();
        assert_eq!(route.handler().as_str(), "detail_handler");
        assert_eq!(params["id"], "42");
    }

    #[test]
    fn test_specificity_is_position_sensitive() {
        // 第一段字面的模式胜过第一段参数的模式
        let table = table_with(&[
            ("/{section}/latest", "section_handler"),
            ("/news/{slug}", "news_handler"),
        ]);
        let (route, _) = table.find(HttpMethod::Get, "/news/latest").unwrap();
        assert_eq!(route.handler().as_str(), "news_handler");
    }

    #[test]
    fn test_method_and_misses() {
        let mut table = table_with(&[("/products", "list_handler")]);
        table
            .add(
                HttpMethod::Post,
                RoutePattern::parse("/products").unwrap(),
                CapabilityId::new("create_handler"),
                None,
            )
            .unwrap();

        assert!(table.find(HttpMethod::Get, "/products").is_some());
        assert!(table.find(HttpMethod::Delete, "/products").is_none());
        assert!(table.find(HttpMethod::Get, "/products/1/extra").is_none());
    }

    #[test]
    fn test_duplicate_shape_rejected() {
        let mut table = table_with(&[("/products/{id}", "detail_handler")]);
        let err = table
            .add(
                HttpMethod::Get,
                RoutePattern::parse("/products/{code}").unwrap(),
                CapabilityId::new("other_handler"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateRoute { .. }));
    }
}
