//! 命令参数模式（ParamSchema）
//!
//! 以显式声明的字段列表校验原始参数：
//! - 收集全部字段级错误（而非遇到第一个即返回），作为 `CommandRejected` 的上下文；
//! - 对字符串形式的整数/数字/布尔值做类型转换；
//! - 丢弃模式未声明的字段，再反序列化为处理器的类型化参数。
//!
use gateway_domain::command::Params;
use gateway_domain::error::{ErrorContext, GatewayError, GatewayResult};
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

/// 参数校验失败时的统一原因
pub const INVALID_PARAMETERS: &str = "Invalid command parameters.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// 不做类型约束
    Any,
}

impl FieldKind {
    fn invalid(&self) -> &'static str {
        match self {
            FieldKind::String => "invalid string",
            FieldKind::Integer => "invalid integer",
            FieldKind::Number => "invalid number",
            FieldKind::Boolean => "invalid boolean",
            FieldKind::Object => "invalid object",
            FieldKind::Array => "invalid array",
            FieldKind::Any => "invalid value",
        }
    }

    fn coerce(&self, value: &Value) -> Result<Value, &'static str> {
        match (self, value) {
            (FieldKind::Any, v) => Ok(v.clone()),
            (FieldKind::String, Value::String(_))
            | (FieldKind::Number, Value::Number(_))
            | (FieldKind::Boolean, Value::Bool(_))
            | (FieldKind::Object, Value::Object(_))
            | (FieldKind::Array, Value::Array(_)) => Ok(value.clone()),
            (FieldKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(value.clone())
            }
            (FieldKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| self.invalid()),
            (FieldKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or(self.invalid()),
            (FieldKind::Boolean, Value::String(s)) => match s.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(self.invalid()),
            },
            _ => Err(self.invalid()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// 参数模式
///
/// ```
/// use gateway_application::schema::{FieldKind, ParamSchema};
/// use serde_json::json;
///
/// let schema = ParamSchema::new()
///     .required("foo", FieldKind::Integer)
///     .optional("note", FieldKind::String);
///
/// let raw = json!({"foo": "3", "extra": true}).as_object().cloned().unwrap();
/// let clean = schema.check(&raw).unwrap();
/// assert_eq!(clean.get("foo"), Some(&json!(3)));
/// assert!(clean.get("extra").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name.into(), kind, true)
    }

    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name.into(), kind, false)
    }

    fn field(mut self, name: String, kind: FieldKind, required: bool) -> Self {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldSpec {
            name,
            kind,
            required,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// 校验并规范化参数；失败时返回全部字段错误
    pub fn check(&self, raw: &Params) -> Result<Params, ErrorContext> {
        let mut clean = Params::new();
        let mut errors = ErrorContext::new();

        for spec in &self.fields {
            match raw.get(&spec.name) {
                None if spec.required => {
                    errors.insert(spec.name.clone(), "required".to_string());
                }
                None => {}
                Some(Value::Null) if spec.required => {
                    errors.insert(spec.name.clone(), "may not be null".to_string());
                }
                Some(Value::Null) => {
                    clean.insert(spec.name.clone(), Value::Null);
                }
                Some(value) => match spec.kind.coerce(value) {
                    Ok(v) => {
                        clean.insert(spec.name.clone(), v);
                    }
                    Err(msg) => {
                        errors.insert(spec.name.clone(), msg.to_string());
                    }
                },
            }
        }

        if errors.is_empty() {
            Ok(clean)
        } else {
            Err(errors)
        }
    }

    /// 校验后反序列化为类型化参数
    pub fn load<T: DeserializeOwned>(&self, raw: &Params) -> GatewayResult<T> {
        let clean = self.check(raw).map_err(|errors| {
            GatewayError::command_rejected(INVALID_PARAMETERS).with_context(errors)
        })?;

        serde_json::from_value(Value::Object(clean)).map_err(|err| {
            GatewayError::command_rejected(format!("{INVALID_PARAMETERS} {err}"))
        })
    }
}
