//! 分发器集成测试
//!
//! 用一个迷你商品目录应用走通完整编排：
//! 路由匹配、作用域生命周期、校验边界、错误隔离与启动自检。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use reqwire::{
    capability, handler_object, recipe, release_hook, Binding, BoundRequest, ContainerError,
    DispatchOutcome, Dispatcher, DispatcherBuilder, DispatcherConfig, Lifetime, RegistryBuilder,
    Request, RequestHandler, Rule, RuleSet,
};

/// 商品仓储契约（外部协作方，容器只关心其构造配方）
#[async_trait]
trait ProductRepository: Send + Sync {
    async fn list(&self) -> Vec<Value>;
    async fn find(&self, id: &str) -> Option<Value>;
}

struct InMemoryProductRepository {
    products: Vec<(String, Value)>,
}

impl InMemoryProductRepository {
    fn with_fixtures() -> Self {
        Self {
            products: vec![
                (
                    "1".to_string(),
                    json!({"id": "1", "name": "keyboard", "price": 59.0}),
                ),
                (
                    "2".to_string(),
                    json!({"id": "2", "name": "mouse", "price": 25.0}),
                ),
            ],
        }
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list(&self) -> Vec<Value> {
        self.products.iter().map(|(_, v)| v.clone()).collect()
    }

    async fn find(&self, id: &str) -> Option<Value> {
        self.products
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, v)| v.clone())
    }
}

/// 请求审计上下文，作用域实例
struct RequestAudit;

/// 同样依赖审计上下文的定价服务，用于验证作用域内共享
struct PricingService;

struct ListProductsHandler {
    repo: Arc<dyn ProductRepository>,
    _audit: Arc<RequestAudit>,
    _pricing: Arc<PricingService>,
}

#[async_trait]
impl RequestHandler for ListProductsHandler {
    async fn handle(&self, _request: BoundRequest) -> Result<Value, anyhow::Error> {
        Ok(json!({ "products": self.repo.list().await }))
    }
}

struct ProductDetailHandler {
    repo: Arc<dyn ProductRepository>,
    _audit: Arc<RequestAudit>,
}

#[async_trait]
impl RequestHandler for ProductDetailHandler {
    async fn handle(&self, request: BoundRequest) -> Result<Value, anyhow::Error> {
        let id = request
            .param("id")
            .ok_or_else(|| anyhow::anyhow!("missing id parameter"))?;
        match self.repo.find(id).await {
            Some(product) => Ok(json!({ "product": product })),
            None => Err(anyhow::anyhow!("product {id} does not exist")),
        }
    }
}

struct FeaturedProductsHandler {
    repo: Arc<dyn ProductRepository>,
}

#[async_trait]
impl RequestHandler for FeaturedProductsHandler {
    async fn handle(&self, _request: BoundRequest) -> Result<Value, anyhow::Error> {
        Ok(json!({ "featured": self.repo.list().await.first() }))
    }
}

struct CreateProductHandler;

#[async_trait]
impl RequestHandler for CreateProductHandler {
    async fn handle(&self, request: BoundRequest) -> Result<Value, anyhow::Error> {
        Ok(json!({ "created": request.body }))
    }
}

struct FailingHandler {
    _audit: Arc<RequestAudit>,
}

#[async_trait]
impl RequestHandler for FailingHandler {
    async fn handle(&self, _request: BoundRequest) -> Result<Value, anyhow::Error> {
        Err(anyhow::anyhow!("storage backend exploded"))
    }
}

struct PanickingHandler {
    _audit: Arc<RequestAudit>,
}

#[async_trait]
impl RequestHandler for PanickingHandler {
    async fn handle(&self, _request: BoundRequest) -> Result<Value, anyhow::Error> {
        panic!("handler bug");
    }
}

struct SleepyHandler {
    _audit: Arc<RequestAudit>,
}

#[async_trait]
impl RequestHandler for SleepyHandler {
    async fn handle(&self, _request: BoundRequest) -> Result<Value, anyhow::Error> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

struct TestApp {
    dispatcher: Dispatcher,
    repo_constructions: Arc<AtomicUsize>,
    audit_constructions: Arc<AtomicUsize>,
    audit_releases: Arc<AtomicUsize>,
}

fn build_app() -> TestApp {
    let repo_constructions = Arc::new(AtomicUsize::new(0));
    let audit_constructions = Arc::new(AtomicUsize::new(0));
    let audit_releases = Arc::new(AtomicUsize::new(0));

    let mut registry = RegistryBuilder::new();

    let repo_count = repo_constructions.clone();
    registry
        .register(Binding::new(
            "product_repository",
            Lifetime::Singleton,
            recipe(move |_| {
                let repo_count = repo_count.clone();
                async move {
                    repo_count.fetch_add(1, Ordering::SeqCst);
                    let repo: Arc<dyn ProductRepository> =
                        Arc::new(InMemoryProductRepository::with_fixtures());
                    Ok(capability(repo))
                }
            }),
        ))
        .unwrap();

    let audit_count = audit_constructions.clone();
    let release_count = audit_releases.clone();
    registry
        .register(
            Binding::new(
                "request_audit",
                Lifetime::Scoped,
                recipe(move |_| {
                    let audit_count = audit_count.clone();
                    async move {
                        audit_count.fetch_add(1, Ordering::SeqCst);
                        Ok(capability(Arc::new(RequestAudit)))
                    }
                }),
            )
            .with_release(release_hook(move |_| {
                let release_count = release_count.clone();
                async move {
                    release_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
        )
        .unwrap();

    registry
        .register(
            Binding::new(
                "pricing_service",
                Lifetime::Transient,
                recipe(|deps| async move {
                    let _audit: Arc<RequestAudit> = deps.get(0)?;
                    Ok(capability(Arc::new(PricingService)))
                }),
            )
            .with_dependencies(["request_audit"]),
        )
        .unwrap();

    registry
        .register(
            Binding::new(
                "list_products_handler",
                Lifetime::Transient,
                recipe(|deps| async move {
                    let repo: Arc<dyn ProductRepository> = deps.get(0)?;
                    let audit: Arc<RequestAudit> = deps.get(1)?;
                    let pricing: Arc<PricingService> = deps.get(2)?;
                    Ok(handler_object(ListProductsHandler {
                        repo,
                        _audit: audit,
                        _pricing: pricing,
                    }))
                }),
            )
            .with_dependencies(["product_repository", "request_audit", "pricing_service"]),
        )
        .unwrap();

    registry
        .register(
            Binding::new(
                "product_detail_handler",
                Lifetime::Transient,
                recipe(|deps| async move {
                    let repo: Arc<dyn ProductRepository> = deps.get(0)?;
                    let audit: Arc<RequestAudit> = deps.get(1)?;
                    Ok(handler_object(ProductDetailHandler {
                        repo,
                        _audit: audit,
                    }))
                }),
            )
            .with_dependencies(["product_repository", "request_audit"]),
        )
        .unwrap();

    registry
        .register(
            Binding::new(
                "featured_handler",
                Lifetime::Transient,
                recipe(|deps| async move {
                    let repo: Arc<dyn ProductRepository> = deps.get(0)?;
                    Ok(handler_object(FeaturedProductsHandler { repo }))
                }),
            )
            .with_dependencies(["product_repository"]),
        )
        .unwrap();

    registry
        .register(Binding::new(
            "create_product_handler",
            Lifetime::Transient,
            recipe(|_| async { Ok(handler_object(CreateProductHandler)) }),
        ))
        .unwrap();

    for (name, kind) in [
        ("failing_handler", 0u8),
        ("panicking_handler", 1u8),
        ("sleepy_handler", 2u8),
    ] {
        registry
            .register(
                Binding::new(
                    name,
                    Lifetime::Transient,
                    recipe(move |deps| async move {
                        let audit: Arc<RequestAudit> = deps.get(0)?;
                        Ok(match kind {
                            0 => handler_object(FailingHandler { _audit: audit }),
                            1 => handler_object(PanickingHandler { _audit: audit }),
                            _ => handler_object(SleepyHandler { _audit: audit }),
                        })
                    }),
                )
                .with_dependencies(["request_audit"]),
            )
            .unwrap();
    }

    let create_rules = RuleSet::new()
        .rule(Rule::required("name"))
        .rule(Rule::min_len("name", 3))
        .rule(Rule::range("price", 0.0, 10_000.0));

    let dispatcher = DispatcherBuilder::new()
        .route("GET", "/products", "list_products_handler")
        .unwrap()
        .route("GET", "/products/{id}", "product_detail_handler")
        .unwrap()
        .route("GET", "/products/featured", "featured_handler")
        .unwrap()
        .route_with_rules("POST", "/products", "create_product_handler", create_rules)
        .unwrap()
        .route("GET", "/fail", "failing_handler")
        .unwrap()
        .route("GET", "/panic", "panicking_handler")
        .unwrap()
        .route("GET", "/slow", "sleepy_handler")
        .unwrap()
        .build(Arc::new(registry.seal()));

    TestApp {
        dispatcher,
        repo_constructions,
        audit_constructions,
        audit_releases,
    }
}

#[tokio::test]
async fn test_end_to_end_list_and_detail() {
    let app = build_app();
    app.dispatcher.preflight().await.unwrap();

    let outcome = app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    match outcome {
        DispatchOutcome::Success { payload } => {
            assert_eq!(payload["products"].as_array().unwrap().len(), 2);
        }
        other => panic!("expected success, got {other:?}"),
    }

    let outcome = app
        .dispatcher
        .dispatch(Request::new("GET", "/products/2"))
        .await;
    match outcome {
        DispatchOutcome::Success { payload } => {
            assert_eq!(payload["product"]["name"], "mouse");
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_literal_route_beats_parameterized() {
    let app = build_app();
    let outcome = app
        .dispatcher
        .dispatch(Request::new("GET", "/products/featured"))
        .await;
    match outcome {
        DispatchOutcome::Success { payload } => {
            // 命中字面路由而不是 {id} 详情路由
            assert!(payload.get("featured").is_some());
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unmatched_requests_are_not_found() {
    let app = build_app();
    assert_eq!(
        app.dispatcher
            .dispatch(Request::new("GET", "/warehouses"))
            .await,
        DispatchOutcome::NotFound
    );
    assert_eq!(
        app.dispatcher
            .dispatch(Request::new("BREW", "/products"))
            .await,
        DispatchOutcome::NotFound
    );
}

#[tokio::test]
async fn test_validation_reports_all_violations() {
    let app = build_app();
    // name缺失 + price越界，两条规则同时失败
    let outcome = app
        .dispatcher
        .dispatch(Request::new("POST", "/products").with_body(json!({ "price": -5 })))
        .await;
    match outcome {
        DispatchOutcome::Invalid { violations } => {
            assert_eq!(violations.len(), 2);
            assert_eq!(violations[0].field, "name");
            assert_eq!(violations[1].field, "price");
        }
        other => panic!("expected invalid, got {other:?}"),
    }

    // 校验失败也要关闭作用域（处理器未执行，作用域为空但流程走完）
    let outcome = app
        .dispatcher
        .dispatch(
            Request::new("POST", "/products").with_body(json!({ "name": "usb hub", "price": 15 })),
        )
        .await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_handler_error_is_isolated_and_scope_closed() {
    let app = build_app();
    let outcome = app.dispatcher.dispatch(Request::new("GET", "/fail")).await;
    assert_eq!(outcome, DispatchOutcome::Failed);
    assert_eq!(app.audit_constructions.load(Ordering::SeqCst), 1);
    assert_eq!(app.audit_releases.load(Ordering::SeqCst), 1);

    // 失败的请求不影响后续请求
    let outcome = app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_handler_panic_translated_to_failed() {
    let app = build_app();
    let outcome = app.dispatcher.dispatch(Request::new("GET", "/panic")).await;
    assert_eq!(outcome, DispatchOutcome::Failed);
    // 作用域照常关闭
    assert_eq!(app.audit_releases.load(Ordering::SeqCst), 1);

    let outcome = app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_scope_closed_exactly_once_per_request() {
    let app = build_app();
    for _ in 0..3 {
        app.dispatcher
            .dispatch(Request::new("GET", "/products/1"))
            .await;
    }
    assert_eq!(app.audit_constructions.load(Ordering::SeqCst), 3);
    assert_eq!(app.audit_releases.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_scoped_audit_shared_within_one_request() {
    let app = build_app();
    // 列表处理器与其定价服务都依赖审计上下文，同一请求内只构造一次
    let outcome = app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    assert!(outcome.is_success());
    assert_eq!(app.audit_constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_singleton_repository_constructed_once_across_requests() {
    let app = build_app();
    for path in ["/products", "/products/1", "/products/featured"] {
        let outcome = app.dispatcher.dispatch(Request::new("GET", path)).await;
        assert!(outcome.is_success());
    }
    assert_eq!(app.repo_constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_request_still_closes_scope() {
    let app = Arc::new(build_app());
    let dispatcher_app = app.clone();
    let task = tokio::spawn(async move {
        dispatcher_app
            .dispatcher
            .dispatch(Request::new("GET", "/slow"))
            .await
    });

    // 等处理器进入睡眠（审计上下文已构造）再取消
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(app.audit_constructions.load(Ordering::SeqCst), 1);
    task.abort();
    let _ = task.await;

    // Drop 兜底把释放工作交给运行时
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(app.audit_releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_preflight_catches_unbound_handler() {
    let registry = RegistryBuilder::new().seal();
    let dispatcher = DispatcherBuilder::new()
        .route("GET", "/ghosts", "ghost_handler")
        .unwrap()
        .build(Arc::new(registry));

    let err = dispatcher.preflight().await.unwrap_err();
    match err {
        ContainerError::UnboundCapability(missing) => {
            assert_eq!(missing.as_str(), "ghost_handler");
        }
        other => panic!("expected UnboundCapability, got {other}"),
    }
}

#[tokio::test]
async fn test_start_honors_preflight_config() {
    let build = |preflight: bool| {
        let registry = RegistryBuilder::new().seal();
        DispatcherBuilder::new()
            .with_config(DispatcherConfig {
                preflight,
                max_body_bytes: None,
            })
            .route("GET", "/ghosts", "ghost_handler")
            .unwrap()
            .build(Arc::new(registry))
    };

    // 自检关闭时启动不触发解析
    assert!(build(false).start().await.is_ok());
    // 自检开启时未绑定的处理器让启动快速失败
    assert!(matches!(
        build(true).start().await,
        Err(ContainerError::UnboundCapability(_))
    ));
}

#[tokio::test]
async fn test_container_stats_visible_through_dispatcher() {
    let app = build_app();
    app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    app.dispatcher.dispatch(Request::new("GET", "/products")).await;
    let stats = app.dispatcher.container_stats();
    assert!(stats.total_resolutions > 0);
    // 单例仓储第二次命中缓存
    assert!(stats.singleton_hits >= 1);
}
