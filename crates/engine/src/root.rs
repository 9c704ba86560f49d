use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use tracktags_core::{BusinessId, Credential, CustomerContext, CustomerId, MetricScope};

use crate::ask::ask;
use crate::error::EngineError;
use crate::registry::EngineContext;
use crate::tenant::{TenantHandle, spawn_tenant};

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub enum RootMessage {
    EnsureBusinessActor {
        business_id: BusinessId,
        credential: Option<Credential>,
        reply: Reply<TenantHandle>,
    },
    /// `context` is used when it is given; otherwise the root fetches it
    /// before spawning. A running coordinator gets a given context pushed.
    EnsureCustomerActor {
        business_id: BusinessId,
        customer_id: CustomerId,
        context: Option<CustomerContext>,
        credential: Option<Credential>,
        reply: Reply<TenantHandle>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Mailbox reference to the root coordinator.
#[derive(Debug, Clone)]
pub struct RootHandle {
    tx: mpsc::UnboundedSender<RootMessage>,
}

const ROOT: &str = "root coordinator";

impl RootHandle {
    pub async fn ensure_business(
        &self,
        business_id: BusinessId,
        credential: Option<Credential>,
        after: Duration,
    ) -> Result<TenantHandle, EngineError> {
        ask(&self.tx, ROOT, "ensure_business_actor", after, |reply| {
            RootMessage::EnsureBusinessActor {
                business_id,
                credential,
                reply,
            }
        })
        .await?
    }

    pub async fn ensure_customer(
        &self,
        business_id: BusinessId,
        customer_id: CustomerId,
        context: Option<CustomerContext>,
        credential: Option<Credential>,
        after: Duration,
    ) -> Result<TenantHandle, EngineError> {
        ask(&self.tx, ROOT, "ensure_customer_actor", after, |reply| {
            RootMessage::EnsureCustomerActor {
                business_id,
                customer_id,
                context,
                credential,
                reply,
            }
        })
        .await?
    }

    pub async fn shutdown(&self, after: Duration) -> Result<(), EngineError> {
        ask(&self.tx, ROOT, "shutdown", after, |reply| RootMessage::Shutdown {
            reply,
        })
        .await
    }
}

struct RootCoordinator {
    ctx: Arc<EngineContext>,
}

pub(crate) fn spawn_root(ctx: &Arc<EngineContext>) -> RootHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = RootCoordinator {
        ctx: Arc::clone(ctx),
    };
    ctx.tracker.spawn(root.run(rx));
    RootHandle { tx }
}

impl RootCoordinator {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<RootMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                RootMessage::EnsureBusinessActor {
                    business_id,
                    credential,
                    reply,
                } => {
                    let result = self.ensure_business(business_id, credential).await;
                    let _ = reply.send(result);
                }
                RootMessage::EnsureCustomerActor {
                    business_id,
                    customer_id,
                    context,
                    credential,
                    reply,
                } => {
                    let result = self
                        .ensure_customer(business_id, customer_id, context, credential)
                        .await;
                    let _ = reply.send(result);
                }
                RootMessage::Shutdown { reply } => {
                    let registry = &self.ctx.registry;
                    for tenant in registry
                        .businesses
                        .handles()
                        .into_iter()
                        .chain(registry.customers.handles())
                    {
                        let _ = tenant.shutdown();
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("root coordinator stopped");
    }

    #[instrument(name = "engine.ensure_business", skip_all, fields(%business_id))]
    async fn ensure_business(
        &self,
        business_id: BusinessId,
        credential: Option<Credential>,
    ) -> Result<TenantHandle, EngineError> {
        let scope = MetricScope::Business { business_id };
        if let Some(handle) = self.ctx.registry.businesses.lookup(&scope.lookup_key()) {
            return Ok(handle);
        }
        if self.ctx.store.business(scope.business_id()).await?.is_none() {
            return Err(EngineError::NotFound(format!(
                "business {}",
                scope.business_id()
            )));
        }
        Ok(self.register(scope, None, credential.as_ref()))
    }

    #[instrument(name = "engine.ensure_customer", skip_all, fields(%business_id, %customer_id))]
    async fn ensure_customer(
        &self,
        business_id: BusinessId,
        customer_id: CustomerId,
        context: Option<CustomerContext>,
        credential: Option<Credential>,
    ) -> Result<TenantHandle, EngineError> {
        let scope = MetricScope::customer(business_id.clone(), customer_id.clone());
        if let Some(handle) = self.ctx.registry.customers.lookup(&scope.lookup_key()) {
            if let Some(context) = context {
                handle.update_context(context)?;
            }
            return Ok(handle);
        }
        let context = match context {
            Some(context) => context,
            None => self
                .ctx
                .store
                .customer_context(&business_id, &customer_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("customer {scope}")))?,
        };
        Ok(self.register(scope, Some(context), credential.as_ref()))
    }

    fn register(
        &self,
        scope: MetricScope,
        context: Option<CustomerContext>,
        credential: Option<&Credential>,
    ) -> TenantHandle {
        let key = scope.lookup_key();
        let directory = self.ctx.registry.tenants_for(&scope);
        let (handle, created) =
            directory.get_or_register_with(&key, || spawn_tenant(&self.ctx, scope, context));
        if created {
            debug!(%key, created_by = ?credential, "coordinator spawned");
        }
        handle
    }
}
