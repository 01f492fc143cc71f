//! Optional observability around credential flows.
//!
//! # Feature Flags
//!
//! - `tracing` runs each flow inside an info span named `warehouse_iam.flow`, carrying
//!   the flow kind and the call-site stage.
//! - `metrics` counts attempts, successes, and failures in `warehouse_iam_flow_total`,
//!   labeled by `flow` and `outcome`.
//!
//! Neither feature changes behavior: [`observe_flow`] hands back the wrapped future's
//! result untouched, and with both features off it compiles down to the bare await.

// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
const FLOW_COUNTER: &str = "warehouse_iam_flow_total";

/// Credential flows observed by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Cache-or-refresh resolution through the manager.
	Resolve,
	/// Interactive browser login (SAML or authorization-code).
	BrowserLogin,
	/// Device-authorization login against the identity-center OIDC service.
	DeviceLogin,
	/// Non-interactive JWT acquisition from a tenant token endpoint.
	JwtExchange,
	/// SAML or web-identity role assumption.
	RoleAssumption,
	/// Control-plane exchange for database credentials.
	ClusterCredentials,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Resolve => "resolve",
			FlowKind::BrowserLogin => "browser_login",
			FlowKind::DeviceLogin => "device_login",
			FlowKind::JwtExchange => "jwt_exchange",
			FlowKind::RoleAssumption => "role_assumption",
			FlowKind::ClusterCredentials => "cluster_credentials",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a credential flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `flow` inside its observability envelope.
///
/// An attempt is recorded up front and the terminal outcome on the way out; `stage`
/// distinguishes call sites sharing a kind, like the two role-assumption grants.
pub async fn observe_flow<T, Fut>(kind: FlowKind, stage: &'static str, flow: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = in_span(kind, stage, flow).await;
	let outcome = if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure };

	record_flow_outcome(kind, outcome);

	result
}

/// Bumps the flow counter when a metrics recorder is installed; a no-op otherwise.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(FLOW_COUNTER, "flow" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

#[cfg(feature = "tracing")]
async fn in_span<T, Fut>(kind: FlowKind, stage: &'static str, flow: Fut) -> T
where
	Fut: Future<Output = T>,
{
	use tracing::Instrument;

	flow.instrument(tracing::info_span!("warehouse_iam.flow", flow = kind.as_str(), stage)).await
}
#[cfg(not(feature = "tracing"))]
async fn in_span<T, Fut>(kind: FlowKind, stage: &'static str, flow: Fut) -> T
where
	Fut: Future<Output = T>,
{
	let _ = (kind, stage);

	flow.await
}
