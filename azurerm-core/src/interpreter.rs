//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes Effects contained in a Plan in order,
//! collecting the results. This is where side effects actually occur.
//! Each Effect runs under its own [`OperationContext`], sharing the
//! interpreter's lock registry and a child of its cancellation token.

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::context::{ImportPolicy, OperationContext};
use crate::effect::Effect;
use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::lock::LockRegistry;
use crate::plan::Plan;
use crate::provider::Provider;
use crate::resource::{ResourceAddress, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete followed by create succeeded
    Replaced { state: State },
    /// Delete succeeded, or the resource was already gone
    Deleted { address: ResourceAddress },
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
    /// Behaviour when a create collides with an unmanaged resource
    pub import_policy: ImportPolicy,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
    locks: LockRegistry,
    cancel: CancellationToken,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
            locks: LockRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally owned root token, e.g. one cancelled on Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Token cancelling every in-flight and future operation of this interpreter
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Build the context for one operation
    pub fn operation_context(&self) -> OperationContext {
        OperationContext::new(&self.locks, self.cancel.child_token())
            .with_import_policy(self.config.import_policy)
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    pub async fn apply(&self, plan: &Plan) -> ApplyResult {
        let mut outcomes = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;

        for effect in plan.effects() {
            if self.cancel.is_cancelled() {
                warn!("run cancelled; skipping {}", effect.address());
                outcomes.push(Err(ProviderError::new(
                    ErrorKind::Cancelled,
                    "run cancelled before this change started",
                )
                .for_resource(effect.address().clone())));
                failure_count += 1;
                break;
            }

            let result = self.execute_effect(effect).await;

            let failed = result.is_err();
            if failed {
                failure_count += 1;
            } else {
                success_count += 1;
            }
            outcomes.push(result);

            if failed && !self.config.continue_on_error {
                break;
            }
        }

        ApplyResult {
            outcomes,
            success_count,
            failure_count,
        }
    }

    /// Execute a single Effect
    async fn execute_effect(&self, effect: &Effect) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        let ctx = self.operation_context();
        debug!("{} {} {}", ctx.id(), effect.symbol(), effect.address());

        match effect {
            Effect::Read {
                address,
                identifier,
            } => {
                let state = self.provider.read(&ctx, address, identifier, None).await?;
                Ok(EffectOutcome::Read { state })
            }
            Effect::Create(resource) => {
                let state = self.provider.create(&ctx, resource).await?;
                info!("{}: created", resource.address);
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { from, to, .. } => {
                let identifier = Self::identifier_of(from)?;
                let state = self.provider.update(&ctx, identifier, from, to).await?;
                info!("{}: updated", to.address);
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { from, to, .. } => {
                let identifier = Self::identifier_of(from)?;
                self.delete_idempotent(&ctx, &from.address, identifier)
                    .await?;
                let state = self.provider.create(&ctx, to).await?;
                info!("{}: replaced", to.address);
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete {
                address,
                identifier,
            } => {
                self.delete_idempotent(&ctx, address, identifier).await?;
                Ok(EffectOutcome::Deleted {
                    address: address.clone(),
                })
            }
        }
    }

    /// Deleting something already gone is success
    async fn delete_idempotent(
        &self,
        ctx: &OperationContext,
        address: &ResourceAddress,
        identifier: &str,
    ) -> ProviderResult<()> {
        match self.provider.delete(ctx, address, identifier).await {
            Ok(()) => {
                info!("{}: deleted", address);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!("{}: already absent", address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn identifier_of(state: &State) -> ProviderResult<&str> {
        state.identifier.as_deref().ok_or_else(|| {
            ProviderError::internal("tracked resource has no identifier")
                .for_resource(state.address.clone())
        })
    }
}
