use std::{
    collections::HashSet,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use dashmap::DashMap;

use crate::{
    ast::Expr,
    cache::{Cache, ExpressionCache, ExpressionCacheKey},
    config::EngineConfig,
    environment::Environment,
    format,
    functions::{DefinitionError, FunctionDefinition, FunctionRegistry, FunctionSignature},
    interpreter::{ErrorKind, EvalError, Interpreter},
    operations::{MathOperation, OperationRegistry},
    parser::{self, ParseError},
    types::{TypeRegistry, TypeResolver},
    value::{FromValue, Value, Variables},
};

/// Receives debug trace messages with `{}` placeholders and their arguments.
pub type Logger = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// Observes every error before it is returned to the caller.
pub type ErrorHandler = Arc<dyn Fn(&Engine, &EngineError) + Send + Sync>;

/// Errors returned by the engine facade.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Expression is empty")]
    EmptyExpression,

    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    InvalidDefinition(#[from] DefinitionError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::EmptyExpression => ErrorKind::Input,
            EngineError::Syntax(_) => ErrorKind::Syntax,
            EngineError::Eval(e) => e.kind(),
            EngineError::InvalidDefinition(DefinitionError::Body(_)) => ErrorKind::Syntax,
            EngineError::InvalidDefinition(_) => ErrorKind::Input,
        }
    }
}

impl From<crate::value::CastError> for EngineError {
    fn from(err: crate::value::CastError) -> Self {
        EngineError::Eval(EvalError::Cast(err))
    }
}

/// Embeddable expression engine.
///
/// All methods take `&self`; one engine can serve many threads. Each call
/// works on a snapshot of the configuration taken when it starts.
///
/// # Examples
///
/// ```
/// use expr_engine::{Engine, Value, Variables};
///
/// let engine = Engine::new();
/// let mut vars = Variables::new();
/// vars.insert("x".to_string(), Value::Integer(9));
///
/// let size = engine
///     .evaluate(r#"if x > 10: "big" elif x > 5: "medium" else: "small""#, &vars)
///     .unwrap();
/// assert_eq!(size, Value::from("medium"));
///
/// let n: f64 = engine.parse("1 + 2 * 3").unwrap();
/// assert_eq!(n, 7.0);
/// ```
pub struct Engine {
    config: RwLock<Arc<EngineConfig>>,
    operations: OperationRegistry,
    functions: FunctionRegistry,
    types: TypeRegistry,
    context: DashMap<String, Value>,
    defaults: DashMap<String, Value>,
    parse_cache: ExpressionCache<String, Arc<Expr>>,
    eval_cache: ExpressionCache<ExpressionCacheKey, Value>,
    /// Bumped whenever cached results become invalid.
    generation: AtomicU64,
    logger: RwLock<Option<Logger>>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::with_config(EngineConfig::default())
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            config: RwLock::new(Arc::new(config)),
            operations: OperationRegistry::new(),
            functions: FunctionRegistry::new(),
            types: TypeRegistry::new(),
            context: DashMap::new(),
            defaults: DashMap::new(),
            parse_cache: ExpressionCache::default(),
            eval_cache: ExpressionCache::default(),
            generation: AtomicU64::new(0),
            logger: RwLock::new(None),
            error_handler: RwLock::new(None),
        }
    }

    /// Uses the given backends for the parse and evaluation caches.
    pub fn with_caches(
        config: EngineConfig,
        parse_cache: impl Cache<String, Arc<Expr>> + 'static,
        eval_cache: impl Cache<ExpressionCacheKey, Value> + 'static,
    ) -> Self {
        Engine {
            parse_cache: ExpressionCache::new(parse_cache),
            eval_cache: ExpressionCache::new(eval_cache),
            ..Engine::with_config(config)
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluates `text` against `variables` merged over the engine's defaults.
    ///
    /// Results are cached by expression text and variable contents.
    #[tracing::instrument(level = "debug", skip(self, variables), fields(variables = variables.len()))]
    pub fn evaluate(&self, text: &str, variables: &Variables) -> Result<Value, EngineError> {
        self.run(text, Some(variables), None)
            .inspect_err(|e| self.report(e))
    }

    /// Evaluates `text` against the default variables and converts the result.
    ///
    /// Results of this form are not stored in the evaluation cache.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn parse<T: FromValue>(&self, text: &str) -> Result<T, EngineError> {
        self.run(text, None, None)
            .and_then(|value| self.convert::<T>(value))
            .inspect_err(|e| self.report(e))
    }

    /// Like [`Engine::parse`] with caller variables.
    #[tracing::instrument(level = "debug", skip(self, variables), fields(variables = variables.len()))]
    pub fn parse_with<T: FromValue>(&self, text: &str, variables: &Variables) -> Result<T, EngineError> {
        self.run(text, Some(variables), None)
            .and_then(|value| self.convert::<T>(value))
            .inspect_err(|e| self.report(e))
    }

    /// Evaluates `text` and casts the whole result to `type_name`, as
    /// `Out<type_name>(...)` would, resolving domain types through the
    /// registered resolvers.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn parse_named(&self, text: &str, type_name: &str) -> Result<Value, EngineError> {
        self.run(text, None, Some(type_name))
            .inspect_err(|e| self.report(e))
    }

    /// Parses `text` through the parse cache.
    pub fn compile(&self, text: &str) -> Result<Arc<Expr>, EngineError> {
        let config = self.config();
        let text = text.trim();
        let result = if text.is_empty() {
            Err(EngineError::EmptyExpression)
        } else {
            self.compile_cached(&config, text)
        };
        result.inspect_err(|e| self.report(e))
    }

    /// Checks that `text` is syntactically valid without evaluating it.
    pub fn validate(&self, text: &str) -> Result<(), EngineError> {
        self.compile(text).map(|_| ())
    }

    /// Re-renders `text` in canonical spacing, or across lines when `pretty`.
    pub fn format_expression(&self, text: &str, pretty: bool) -> Result<String, EngineError> {
        let ast = self.compile(text)?;
        Ok(if pretty {
            format::pretty(&ast)
        } else {
            format::compact(&ast)
        })
    }

    /// Shared body of the evaluation entry points. `cast` wraps the parsed
    /// tree in a cast node; such results are not eval-cached.
    fn run(
        &self,
        text: &str,
        variables: Option<&Variables>,
        cast: Option<&str>,
    ) -> Result<Value, EngineError> {
        let started = Instant::now();
        // Read before the config snapshot so any later invalidation is noticed.
        let generation = self.generation.load(Ordering::SeqCst);
        let config = self.config();
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyExpression);
        }
        self.log(&config, "Evaluating expression: {}", &[Value::from(text)]);

        let merged = self.merged_variables(variables);
        let key = (variables.is_some() && cast.is_none() && config.cache_evaluations)
            .then(|| ExpressionCacheKey::new(text, &merged));

        if let Some(key) = &key {
            if let Some(hit) = self.eval_cache.get(key) {
                tracing::debug!(expression = text, "eval cache hit");
                self.log(&config, "Cache hit for eval: {}", &[Value::from(text)]);
                return Ok(hit);
            }
            tracing::debug!(expression = text, "eval cache miss");
            self.log(&config, "Cache miss for eval: {}", &[Value::from(text)]);
        }

        let mut ast = self.compile_cached(&config, text)?;
        if let Some(type_name) = cast {
            ast = Arc::new(Expr::Cast {
                type_name: type_name.to_string(),
                inner: Box::new(Expr::clone(&ast)),
            });
        }

        let mut env = Environment::from_variables(&merged);
        let interpreter = Interpreter::new(
            &config,
            &self.operations,
            &self.functions,
            &self.types,
            &self.context,
        )
        .with_deadline(config.timeout().map(|limit| started + limit));
        let result = interpreter.evaluate(&ast, &mut env, 0)?;

        if let Some(key) = key
            && interpreter.is_cacheable()
        {
            self.store_result(generation, key, result.clone());
        }

        tracing::debug!(result = %result, visits = interpreter.visits(), "evaluation completed");
        self.log(
            &config,
            "Expression evaluation completed. Result: {}",
            &[result.clone()],
        );
        Ok(result)
    }

    /// Stores `result` unless the cache was invalidated since `generation`
    /// was read. A concurrent invalidation either bumps the counter before
    /// the re-check or clears the cache after the put.
    fn store_result(&self, generation: u64, key: ExpressionCacheKey, result: Value) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.eval_cache.put(key.clone(), result);
        if self.generation.load(Ordering::SeqCst) != generation {
            self.eval_cache.remove(&key);
        }
    }

    /// Drops every cached result, including ones still being computed.
    fn invalidate_results(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.eval_cache.clear();
    }

    fn compile_cached(&self, config: &EngineConfig, text: &str) -> Result<Arc<Expr>, EngineError> {
        let key = text.to_string();
        if let Some(ast) = self.parse_cache.get(&key) {
            tracing::trace!(expression = text, "parse cache hit");
            self.log(config, "Cache hit for parse: {}", &[Value::from(text)]);
            return Ok(ast);
        }
        tracing::trace!(expression = text, "parse cache miss");
        self.log(config, "Cache miss for parse: {}", &[Value::from(text)]);

        let ast = Arc::new(parser::parse(text)?);
        self.parse_cache.put(key, Arc::clone(&ast));
        Ok(ast)
    }

    fn merged_variables(&self, variables: Option<&Variables>) -> Variables {
        let mut merged: Variables = self
            .defaults
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if let Some(variables) = variables {
            merged.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    fn convert<T: FromValue>(&self, value: Value) -> Result<T, EngineError> {
        Ok(T::coerce_from(value)?)
    }

    fn log(&self, config: &EngineConfig, message: &str, args: &[Value]) {
        if !config.debug_mode {
            return;
        }
        let logger = self
            .logger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(logger) = logger {
            logger(message, args);
        }
    }

    fn report(&self, error: &EngineError) {
        tracing::debug!(error = %error, kind = ?error.kind(), "evaluation failed");
        let handler = self
            .error_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(self, error);
        }
    }

    // ------------------------------------------------------------------
    // Default variables
    // ------------------------------------------------------------------

    /// Sets a default variable. Caller-supplied variables of the same name win.
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.defaults.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.defaults.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove_variable(&self, name: &str) -> Option<Value> {
        self.defaults.remove(name).map(|(_, v)| v)
    }

    pub fn clear_variables(&self) {
        self.defaults.clear();
    }

    pub fn variables(&self) -> Variables {
        self.merged_variables(None)
    }

    // ------------------------------------------------------------------
    // Functions, operations and types
    // ------------------------------------------------------------------

    /// Registers a host function, replacing any function of the same name.
    ///
    /// # Examples
    ///
    /// ```
    /// use expr_engine::{Engine, FunctionSignature, Value, ValueType};
    ///
    /// let engine = Engine::new();
    /// engine.register_function(
    ///     "double",
    ///     |_, args, _| Ok(Value::Float(args[0].as_float().unwrap_or(0.0) * 2.0)),
    ///     FunctionSignature::new(vec![ValueType::Number], ValueType::Number),
    /// );
    /// let n: f64 = engine.parse("double(double(2))").unwrap();
    /// assert_eq!(n, 8.0);
    /// ```
    pub fn register_function<F>(&self, name: impl Into<String>, callable: F, signature: FunctionSignature)
    where
        F: Fn(&Interpreter<'_>, &[Value], Option<&str>) -> Result<Value, EvalError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        tracing::debug!(function = %name, "registering function");
        self.functions.register(name, callable, signature);
        self.invalidate_results();
    }

    /// Defines a function from source such as `double(x) => x * 2`.
    pub fn define_function(&self, definition: &str) -> Result<(), EngineError> {
        let definition = FunctionDefinition::parse(definition)
            .map_err(EngineError::from)
            .inspect_err(|e| self.report(e))?;
        tracing::debug!(function = %definition.name, "defining function");
        definition.register(&self.functions);
        self.invalidate_results();
        Ok(())
    }

    pub fn unregister_function(&self, name: &str) -> bool {
        let removed = self.functions.unregister(name);
        if removed {
            self.invalidate_results();
        }
        removed
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.names()
    }

    pub fn register_operation(&self, operation: impl MathOperation + 'static) {
        self.operations.register(operation);
        self.invalidate_results();
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// Registers a resolver consulted by `Out<name>(...)`.
    pub fn register_variable_type(&self, name: &str, resolver: impl TypeResolver + 'static) {
        self.types.register_variable_type(name, resolver);
        self.invalidate_results();
    }

    /// Registers a resolver consulted when coercing function parameters and results.
    pub fn register_function_type(&self, name: &str, resolver: impl TypeResolver + 'static) {
        self.types.register_function_type(name, resolver);
        self.invalidate_results();
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the configuration with a modified copy. Cached results are dropped.
    pub fn update_config(&self, update: impl FnOnce(&mut EngineConfig)) {
        {
            let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = EngineConfig::clone(&guard);
            update(&mut next);
            *guard = Arc::new(next);
        }
        self.invalidate_results();
    }

    pub fn set_config(&self, config: EngineConfig) {
        self.update_config(|c| *c = config);
    }

    pub fn set_strict_mode(&self, strict: bool) {
        self.update_config(|c| c.strict_mode = strict);
    }

    pub fn is_strict_mode(&self) -> bool {
        self.config().strict_mode
    }

    /// Values above [`crate::interpreter::MAX_EVALUATION_DEPTH`] behave as that ceiling.
    pub fn set_max_recursion_depth(&self, depth: usize) {
        self.update_config(|c| c.max_recursion_depth = depth);
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.config().max_recursion_depth
    }

    /// `0` disables the timeout.
    pub fn set_evaluation_timeout_ms(&self, millis: u64) {
        self.update_config(|c| c.evaluation_timeout_ms = millis);
    }

    pub fn evaluation_timeout_ms(&self) -> u64 {
        self.config().evaluation_timeout_ms
    }

    pub fn set_debug_mode(&self, debug: bool) {
        self.update_config(|c| c.debug_mode = debug);
    }

    pub fn is_debug_mode(&self) -> bool {
        self.config().debug_mode
    }

    pub fn set_undefined_value(&self, value: impl Into<Value>) {
        let value = value.into();
        self.update_config(|c| c.undefined_value = value);
    }

    pub fn set_cache_evaluations(&self, enabled: bool) {
        self.update_config(|c| c.cache_evaluations = enabled);
    }

    pub fn set_variable_whitelist<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.update_config(|c| c.variable_whitelist = names);
    }

    pub fn set_variable_blacklist<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.update_config(|c| c.variable_blacklist = names);
    }

    pub fn set_function_whitelist<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.update_config(|c| c.function_whitelist = names);
    }

    pub fn set_function_blacklist<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.update_config(|c| c.function_blacklist = names);
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Receives trace messages while debug mode is on.
    pub fn set_logger(&self, logger: impl Fn(&str, &[Value]) + Send + Sync + 'static) {
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(logger));
    }

    pub fn clear_logger(&self) {
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Called with every error before it is returned.
    pub fn set_error_handler(&self, handler: impl Fn(&Engine, &EngineError) + Send + Sync + 'static) {
        *self.error_handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        *self.error_handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Stores a value functions can read through [`Interpreter::context`].
    ///
    /// Context is not part of the evaluation cache key, so changing it drops
    /// cached results.
    pub fn put_context(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
        self.invalidate_results();
    }

    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.context.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove_context(&self, key: &str) -> Option<Value> {
        let removed = self.context.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.invalidate_results();
        }
        removed
    }

    pub fn clear_context(&self) {
        self.context.clear();
        self.invalidate_results();
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    pub fn clear_caches(&self) {
        self.parse_cache.clear();
        self.invalidate_results();
    }

    pub fn parse_cache_len(&self) -> usize {
        self.parse_cache.len()
    }

    pub fn eval_cache_len(&self) -> usize {
        self.eval_cache.len()
    }

    pub fn is_parse_cached(&self, text: &str) -> bool {
        self.parse_cache.contains_key(&text.trim().to_string())
    }
}
