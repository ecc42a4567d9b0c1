//! Server-side store: async initialization, then string or streamed output.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::{self, LocalBoxFuture};
use futures_util::stream::{self, FuturesUnordered, LocalBoxStream};
use futures_util::{FutureExt, StreamExt};
use tracing::debug;

use crate::config::RenderConfig;
use crate::dispatch::dispatcher;
use crate::error::Result;
use crate::state::{Meta, Readable, Registry, Snapshot, Token, TokenKey, Writable};
use crate::view::VNode;

use super::string::render_to_string;

type InitHook = Box<dyn FnOnce(InitActions) -> LocalBoxFuture<'static, ()>>;

/// What an init hook may do to the store's state.
///
/// Every token written through the actions is remembered so streamed output
/// can send exactly what the hook produced.
#[derive(Clone)]
pub struct InitActions {
    registry: Registry,
    touched: Rc<RefCell<Vec<TokenKey>>>,
}

impl InitActions {
    fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            touched: Rc::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get<S: Readable>(&self, token: &S) -> S::Value {
        self.registry.get(token)
    }

    /// Publish `value` to `token` and mark it completed.
    pub fn supply<S: Writable>(&self, token: &S, value: S::Value) {
        self.touch(token.key());
        self.touch(token.meta().key());
        dispatcher::publish(&self.registry, token, value);
    }

    pub fn pending<S: Writable>(&self, token: &S, message: S::Message) {
        self.touch(token.meta().key());
        dispatcher::set_meta(&self.registry, token, Meta::Pending { message });
    }

    pub fn error<S: Writable>(&self, token: &S, reason: impl Into<String>, message: Option<S::Message>) {
        self.touch(token.meta().key());
        dispatcher::set_meta(
            &self.registry,
            token,
            Meta::Error {
                reason: reason.into(),
                message,
            },
        );
    }

    fn touch(&self, key: TokenKey) {
        let mut touched = self.touched.borrow_mut();
        if !touched.contains(&key) {
            touched.push(key);
        }
    }

    fn snapshot(&self, include_meta: bool) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for key in self.touched.borrow().iter() {
            if let Some((id, entry)) = self.registry.persisted(*key, include_meta) {
                snapshot.insert(id, entry);
            }
        }
        snapshot
    }
}

/// A registry prepared on the server before rendering.
///
/// ```rust,ignore
/// let user = container(String::new()).with_id("user");
/// let mut store = Store::new(RenderConfig::default())?;
/// store.init({
///     let user = user.clone();
///     move |actions| async move {
///         let name = load_user().await;
///         actions.supply(&user, name);
///     }
/// });
/// let html = store.render_to_string(&view).await?;
/// ```
pub struct Store {
    registry: Registry,
    config: RenderConfig,
    hooks: Vec<InitHook>,
}

impl Store {
    pub fn new(config: RenderConfig) -> Result<Self> {
        Self::with_registry(Registry::new(), config)
    }

    /// Fails with `StoreError::Config` when the script globals in `config`
    /// are not usable identifiers.
    pub fn with_registry(registry: Registry, config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            hooks: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Register an async hook run before rendering.
    pub fn init<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(InitActions) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.hooks.push(Box::new(move |actions| hook(actions).boxed_local()));
        self
    }

    /// Run every registered hook to completion, concurrently.
    pub async fn initialize(&mut self) {
        let hooks = std::mem::take(&mut self.hooks);
        debug!(hooks = hooks.len(), "initializing store");
        let registry = &self.registry;
        future::join_all(hooks.into_iter().map(|hook| hook(InitActions::new(registry)))).await;
    }

    /// Markup followed by the hydration script and activation scripts.
    pub async fn render_to_string(&mut self, view: &VNode) -> Result<String> {
        self.initialize().await;
        let mut html = render_to_string(&self.registry, view);
        html.push_str(&self.hydration_script()?);
        html.push_str(&self.config.activation_tags());
        Ok(html)
    }

    /// Markup rendered with the state available now, then one script per init
    /// hook as it settles, then the activation scripts.
    ///
    /// Each hook fragment merges the state the hook touched into
    /// `window.<stream_global>`.
    pub fn render_to_stream(mut self, view: &VNode) -> LocalBoxStream<'static, Result<String>> {
        let hooks = std::mem::take(&mut self.hooks);
        let markup = render_to_string(&self.registry, view);
        let shell = self.hydration_script().map(|script| markup + &script);
        debug!(hooks = hooks.len(), "streaming render");

        let Store { registry, config, .. } = self;
        let fragments: FuturesUnordered<_> = hooks
            .into_iter()
            .map(|hook| {
                let actions = InitActions::new(&registry);
                let config = config.clone();
                hook(actions.clone()).map(move |()| stream_fragment(&actions, &config))
            })
            .collect();
        let tail = config.activation_tags();

        stream::once(future::ready(shell))
            .chain(fragments)
            .chain(stream::once(future::ready(Ok(tail))))
            .boxed_local()
    }

    fn hydration_script(&self) -> Result<String> {
        self.registry
            .snapshot(self.config.include_meta)
            .to_script(&self.config.state_global)
    }
}

fn stream_fragment(actions: &InitActions, config: &RenderConfig) -> Result<String> {
    let json = actions.snapshot(config.include_meta).to_script_json()?;
    let global = &config.stream_global;
    Ok(format!(
        "<script>Object.assign(window.{global} = window.{global} || {{}}, {json});</script>"
    ))
}
