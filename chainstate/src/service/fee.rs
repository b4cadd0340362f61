//! Fee estimation for nodes without `estimatesmartfee`.

use async_trait::async_trait;
use serde_json::json;

use super::{ChainStateService, FetchError, ServiceError};
use crate::model::FeeRate;
use crate::params::FeeParams;
use crate::rpc::NodePool;

/// Answers `getFee` through the legacy `estimatefee` RPC.
///
/// Bitcoin SV nodes dropped smart fee estimation; `estimatefee` replies with
/// a bare number instead of an object. Registered as a `GetFee` override, so
/// every other operation stays with the chain's default implementation.
#[derive(Debug, Clone)]
pub struct LegacyFeeEstimator {
    nodes: NodePool,
}

impl LegacyFeeEstimator {
    #[must_use]
    pub const fn new(nodes: NodePool) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl ChainStateService for LegacyFeeEstimator {
    async fn get_fee(&self, params: &FeeParams) -> Result<FeeRate, ServiceError> {
        let node = self.nodes.node(&params.chain)?;
        let reply = node.call("estimatefee", vec![json!(params.target)]).await?;
        let feerate = reply
            .as_f64()
            .ok_or_else(|| FetchError::new(format!("unexpected estimatefee reply: {reply}")))?;
        Ok(FeeRate {
            feerate,
            blocks: Some(params.target),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::params::RawQuery;
    use crate::rpc::mock::ScriptedRpc;
    use crate::service::Operation;

    fn params(target: &str) -> FeeParams {
        let query = RawQuery {
            chain: Some("bsv".into()),
            network: Some("main".into()),
            ..RawQuery::default()
        };
        FeeParams::normalize(&query, target).expect("valid")
    }

    fn estimator(rpc: ScriptedRpc) -> LegacyFeeEstimator {
        LegacyFeeEstimator::new(NodePool::new("BSV").with_node("main", Arc::new(rpc)))
    }

    #[tokio::test]
    async fn reads_the_bare_number() {
        let svc = estimator(ScriptedRpc::new().reply("estimatefee", json!(0.0005)));
        let fee = svc.get_fee(&params("2")).await.expect("fee");
        assert!((fee.feerate - 0.0005).abs() < f64::EPSILON);
        assert_eq!(fee.blocks, Some(2));
    }

    #[tokio::test]
    async fn node_errors_pass_through() {
        let svc = estimator(ScriptedRpc::new().fail("estimatefee", "Loading block index..."));
        let err = svc.get_fee(&params("2")).await.expect_err("node down");
        assert_eq!(err.to_string(), "Loading block index...");
    }

    #[tokio::test]
    async fn other_operations_are_not_provided() {
        let svc = estimator(ScriptedRpc::new());
        let chain = params("1").chain;
        let err = svc.get_local_tip(&chain).await.expect_err("override only");
        assert!(matches!(err, ServiceError::Unsupported(Operation::GetLocalTip)));
    }
}
