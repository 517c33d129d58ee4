//! Request Dispatcher: decodes one ingress message, resolves the caller,
//! invokes the named method with ambient per-call context installed, and
//! sends the reply through a sticky session claim. Concurrency across calls
//! is bounded by a semaphore sized `rpcThreadPoolSize`, mirroring the fixed
//! thread pool the design document describes.

use crate::broker::IngressEnvelope;
use crate::codec::{Codec, ReplyCodecContext};
use crate::error::{self, GatewayError, RpcError};
use crate::forwarder::ObservationForwarder;
use crate::host::{Invocation, MethodTable};
use crate::ids::{ObservationIdMinter, RequestId};
use crate::observability::Metrics;
use crate::pool::SessionPool;
use crate::principal::{AuthResolver, UserPrincipal};
use crate::protocol::ClientToServer;
use crate::registry::Registry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;

tokio::task_local! {
    /// Per-call ambient context: lets host methods ask "who is calling me?"
    /// without the caller plumbing a principal through every signature.
    /// Scoped to exactly the lifetime of one `Method::invoke` call.
    static CALL_CONTEXT: UserPrincipal;
}

/// Reads the principal for the call currently executing on this task. Panics
/// if called outside an active invocation — host methods only ever run
/// inside one, so this is a programming-error backstop, not a runtime
/// condition callers need to handle.
pub fn current_caller() -> UserPrincipal {
    CALL_CONTEXT.with(|principal| principal.clone())
}

pub struct Dispatcher {
    methods: MethodTable,
    pool: Arc<SessionPool>,
    registry: Arc<Registry>,
    codec: Arc<dyn Codec>,
    forwarder: Arc<ObservationForwarder>,
    minter: Arc<ObservationIdMinter>,
    auth: Arc<dyn AuthResolver>,
    legal_name: Arc<str>,
    permits: Arc<Semaphore>,
    in_flight: crate::waitgroup::WaitGroup,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        methods: MethodTable,
        pool: Arc<SessionPool>,
        registry: Arc<Registry>,
        codec: Arc<dyn Codec>,
        forwarder: Arc<ObservationForwarder>,
        minter: Arc<ObservationIdMinter>,
        auth: Arc<dyn AuthResolver>,
        legal_name: Arc<str>,
        rpc_thread_pool_size: usize,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            methods,
            pool,
            registry,
            codec,
            forwarder,
            minter,
            auth,
            legal_name,
            permits: Arc::new(Semaphore::new(rpc_thread_pool_size.max(1))),
            in_flight: crate::waitgroup::WaitGroup::new(),
            metrics,
        })
    }

    /// Waits for every currently-spawned `handle()` task to finish, up to
    /// `timeout`. Used by `Gateway::close` to give in-flight dispatches a
    /// chance to send their reply before the Session Pool is drained.
    pub async fn wait_for_idle(&self, timeout: std::time::Duration) {
        self.in_flight.wait_for_idle(timeout).await;
    }

    /// Handles one ingress message. The message is ACKed as soon as handling
    /// has been *scheduled*, not once it completes — a crash between
    /// scheduling and serving loses the call with no client retry. This
    /// mirrors the source behavior deliberately; clients are expected to
    /// time out and retry rather than rely on redelivery.
    pub fn handle(self: &Arc<Self>, mut envelope: IngressEnvelope) {
        let dispatcher = Arc::clone(self);
        let validated_user = envelope.validated_user.clone();
        let body = envelope.body.clone();
        let guard = self.in_flight.track();
        tokio::spawn(async move {
            let _guard = guard;
            dispatcher.process(validated_user, body).await;
        });
        envelope.ack();
    }

    async fn process(self: Arc<Self>, validated_user: Option<String>, body: bytes::Bytes) {
        let message = match self.codec.decode_client_message(&body) {
            Ok(message) => message,
            Err(err) => {
                error::log_dropped(None, &err);
                return;
            }
        };
        match message {
            ClientToServer::ObservablesClosed(ids) => {
                self.registry.invalidate(&ids);
            }
            ClientToServer::Request(mut request) => {
                let request_id = request.request_id;
                // The validated-user header is stamped by the broker on the
                // envelope, not carried inside the decoded wire body.
                request.validated_user = validated_user;
                self.metrics.requests_dispatched.increment();
                let span = tracing::info_span!("dispatch", request_id = %request_id, method = %request.method);
                self.serve_request(request).instrument(span).await;
            }
        }
    }

    async fn serve_request(self: &Arc<Self>, request: crate::protocol::RpcRequest) {
        let request_id = request.request_id;
        let caller = match self.resolve_caller(request.validated_user.as_deref()).await {
            Ok(caller) => caller,
            Err(err) => {
                let wire_err = err
                    .into_wire_error()
                    .unwrap_or_else(|| RpcError::new("authorization_error", "unknown principal"));
                self.reply(request_id, request.client_address, Err(wire_err)).await;
                return;
            }
        };

        let method = match self.methods.get(&request.method) {
            Some(method) => method,
            None => {
                self.reply(
                    request_id,
                    request.client_address,
                    Err(RpcError::unknown_method(&request.method)),
                )
                .await;
                return;
            }
        };

        let _permit = self.permits.acquire().await.expect("semaphore never closed");
        let result = self.invoke(method, caller, request.args).await;
        self.reply(
            request_id,
            request.client_address,
            result.map_err(|err| {
                err.into_wire_error()
                    .unwrap_or_else(|| RpcError::new("invocation_error", "internal error"))
            }),
        )
        .await;
    }

    async fn resolve_caller(&self, validated_user: Option<&str>) -> Result<UserPrincipal, GatewayError> {
        let name = validated_user
            .ok_or_else(|| GatewayError::Protocol("missing validated-user header".to_string()))?;
        if let Some(principal) = self.auth.resolve(name).await {
            return Ok(principal);
        }
        if name == &*self.legal_name {
            return Ok(UserPrincipal::node(Arc::clone(&self.legal_name)));
        }
        Err(GatewayError::Authorization(name.to_string()))
    }

    async fn invoke(
        &self,
        method: Arc<dyn crate::host::Method>,
        caller: UserPrincipal,
        args: Vec<crate::value::RpcValue>,
    ) -> Result<crate::value::RpcValue, GatewayError> {
        let invocation = Invocation { caller: caller.clone(), args };
        let call = CALL_CONTEXT.scope(caller, method.invoke(invocation));
        match tokio::spawn(call).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(GatewayError::Invocation {
                cause: panic_message(join_err),
            }),
            Err(join_err) => Err(GatewayError::Lifecycle(join_err.to_string())),
        }
    }

    async fn reply(
        &self,
        request_id: RequestId,
        client_address: crate::ids::ClientAddress,
        result: crate::protocol::RpcReplyResult,
    ) {
        let context = ReplyCodecContext::new(
            request_id,
            client_address.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.forwarder),
            Arc::clone(&self.minter),
        );
        // The subscribe calls inside encode_reply happen before this
        // function can send anything, which is what guarantees the reply
        // reaches the client before any observation it references.
        let encoded = match self.codec.encode_reply(&context, request_id, result).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error::log_dropped(Some(request_id), &err);
                return;
            }
        };
        let slot = match self.pool.claim_sticky(request_id).await {
            Ok(slot) => slot,
            Err(err) => {
                error::log_dropped(Some(request_id), &err);
                return;
            }
        };
        match slot.send(&client_address, encoded).await {
            Ok(()) => self.metrics.replies_sent.increment(),
            Err(err) => error::log_dropped(Some(request_id), &err),
        }
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "host method panicked".to_string()
            }
        }
        Err(_) => "host method panicked".to_string(),
    }
}
