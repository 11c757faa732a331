//! 校验边界
//!
//! 针对绑定后的输入模型逐字段求值声明式规则。
//! 规则之间相互独立，不在首个失败处短路，调用方一次拿到全部违规。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// 单个字段级违规
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

type Predicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// 声明式校验规则：一个字段 + 一条消息模板 + 一个纯谓词
///
/// 消息模板中的 `{field}` 会替换为字段名。
#[derive(Clone)]
pub struct Rule {
    field: String,
    message: String,
    predicate: Predicate,
}

impl Rule {
    /// 自定义谓词规则
    pub fn custom(
        field: impl Into<String>,
        message: impl Into<String>,
        predicate: impl Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// 字段必须存在且非null
    pub fn required(field: impl Into<String>) -> Self {
        Self::custom(
            field,
            "field '{field}' is required",
            |value| !matches!(value, None | Some(Value::Null)),
        )
    }

    /// 字符串字段最小长度；缺失的字段由required单独约束，此处放行
    pub fn min_len(field: impl Into<String>, min: usize) -> Self {
        Self::custom(
            field,
            format!("field '{{field}}' must be at least {min} characters"),
            move |value| match value {
                None | Some(Value::Null) => true,
                Some(Value::String(text)) => text.chars().count() >= min,
                Some(_) => false,
            },
        )
    }

    /// 数值字段必须落在闭区间内；缺失的字段放行
    pub fn range(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self::custom(
            field,
            format!("field '{{field}}' must be between {min} and {max}"),
            move |value| match value {
                None | Some(Value::Null) => true,
                Some(Value::Number(number)) => number
                    .as_f64()
                    .map(|n| n >= min && n <= max)
                    .unwrap_or(false),
                Some(_) => false,
            },
        )
    }

    fn evaluate(&self, model: &Value) -> Option<Violation> {
        let value = model.get(&self.field);
        if (self.predicate)(value) {
            None
        } else {
            Some(Violation {
                field: self.field.clone(),
                message: self.message.replace("{field}", &self.field),
            })
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("field", &self.field)
            .field("message", &self.message)
            .finish()
    }
}

/// 一个输入模型的规则集合，按声明顺序求值
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条规则
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 求值全部规则，返回按声明顺序排列的违规列表（空表示通过）
    pub fn validate(&self, model: &Value) -> Vec<Violation> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(model))
            .collect()
    }
}
