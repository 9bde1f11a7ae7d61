use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;
use whalewatch_core_types::{
    OutputKind, ResolvedTransaction, ShardPair, TokenAmount, TxInput, TxOutput,
};

use crate::error::RemoteError;

/// Read-only view of the full node needed by the confirmation gate.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_height(&self, shard: ShardPair) -> Result<u64, RemoteError>;
    async fn is_block_in_main_chain(&self, block_hash: &str) -> Result<bool, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerLookup {
    Found(ResolvedTransaction),
    NotIndexed,
}

#[async_trait]
pub trait TransactionIndexer: Send + Sync {
    async fn lookup_transaction(&self, tx_id: &str) -> Result<IndexerLookup, RemoteError>;
}

fn build_http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .context("failed building http client")
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(&format!("{trimmed}/")).with_context(|| format!("invalid base url: {raw}"))
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url, RemoteError> {
    base.join(path).map_err(|error| RemoteError::Transport {
        endpoint: format!("{base}{path}"),
        message: error.to_string(),
    })
}

fn transport_error(endpoint: &Url, error: reqwest::Error) -> RemoteError {
    RemoteError::Transport {
        endpoint: endpoint.to_string(),
        message: error.to_string(),
    }
}

/// 429 and 5xx are worth another try; any other failure status is not.
async fn classify_failure(endpoint: &Url, response: reqwest::Response) -> RemoteError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return RemoteError::RetryableStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        };
    }
    let body = response.text().await.unwrap_or_default();
    RemoteError::UnexpectedStatus {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body: body.chars().take(256).collect(),
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    endpoint: &Url,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    response.json::<T>().await.map_err(|error| RemoteError::Decode {
        endpoint: endpoint.to_string(),
        message: error.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfo {
    current_height: u64,
}

#[derive(Debug, Clone)]
pub struct FullnodeClient {
    base_url: Url,
    http: Client,
}

impl FullnodeClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            http: build_http_client(request_timeout)?,
        })
    }
}

#[async_trait]
impl ChainClient for FullnodeClient {
    async fn current_height(&self, shard: ShardPair) -> Result<u64, RemoteError> {
        let mut endpoint = join_endpoint(&self.base_url, "blockflow/chain-info")?;
        endpoint
            .query_pairs_mut()
            .append_pair("fromGroup", &shard.from.to_string())
            .append_pair("toGroup", &shard.to.to_string());
        let response = self
            .http
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|error| transport_error(&endpoint, error))?;
        if !response.status().is_success() {
            return Err(classify_failure(&endpoint, response).await);
        }
        let info: ChainInfo = decode_json(&endpoint, response).await?;
        Ok(info.current_height)
    }

    async fn is_block_in_main_chain(&self, block_hash: &str) -> Result<bool, RemoteError> {
        let mut endpoint = join_endpoint(&self.base_url, "blockflow/is-block-in-main-chain")?;
        endpoint
            .query_pairs_mut()
            .append_pair("blockHash", block_hash);
        let response = self
            .http
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|error| transport_error(&endpoint, error))?;
        if !response.status().is_success() {
            return Err(classify_failure(&endpoint, response).await);
        }
        decode_json::<bool>(&endpoint, response).await
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerToken {
    id: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerInput {
    #[serde(default)]
    address: String,
    #[serde(default)]
    atto_alph_amount: String,
    #[serde(default)]
    tokens: Vec<ExplorerToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerOutput {
    #[serde(rename = "type", default)]
    output_type: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    atto_alph_amount: String,
    #[serde(default)]
    tokens: Vec<ExplorerToken>,
}

#[derive(Debug, Deserialize)]
struct ExplorerTransaction {
    #[serde(rename = "type", default)]
    tx_type: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    inputs: Vec<ExplorerInput>,
    #[serde(default)]
    outputs: Vec<ExplorerOutput>,
}

fn convert_tokens(tokens: Vec<ExplorerToken>) -> Vec<TokenAmount> {
    tokens
        .into_iter()
        .map(|token| TokenAmount {
            id: token.id,
            amount: token.amount,
        })
        .collect()
}

fn convert_transaction(tx_id: &str, raw: ExplorerTransaction) -> ResolvedTransaction {
    let inputs = raw
        .inputs
        .into_iter()
        .map(|input| TxInput {
            address: input.address,
            native_amount: input.atto_alph_amount,
            tokens: convert_tokens(input.tokens),
        })
        .collect();
    let outputs = raw
        .outputs
        .into_iter()
        .filter_map(|output| {
            let kind = match output.output_type.to_ascii_lowercase().as_str() {
                "assetoutput" => OutputKind::Asset,
                "contractoutput" => OutputKind::Contract,
                other => {
                    debug!(tx_id, output_type = other, "skipping unknown output type");
                    return None;
                }
            };
            Some(TxOutput {
                kind,
                address: output.address,
                native_amount: output.atto_alph_amount,
                tokens: convert_tokens(output.tokens),
            })
        })
        .collect();
    ResolvedTransaction {
        tx_id: if raw.hash.is_empty() {
            tx_id.to_string()
        } else {
            raw.hash
        },
        finalized: raw.tx_type.eq_ignore_ascii_case("accepted"),
        tx_type: raw.tx_type,
        inputs,
        outputs,
    }
}

#[derive(Debug, Clone)]
pub struct ExplorerClient {
    base_url: Url,
    http: Client,
}

impl ExplorerClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            http: build_http_client(request_timeout)?,
        })
    }
}

#[async_trait]
impl TransactionIndexer for ExplorerClient {
    async fn lookup_transaction(&self, tx_id: &str) -> Result<IndexerLookup, RemoteError> {
        let endpoint = join_endpoint(&self.base_url, &format!("transactions/{tx_id}"))?;
        let response = self
            .http
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|error| transport_error(&endpoint, error))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(IndexerLookup::NotIndexed);
        }
        if !status.is_success() {
            return Err(classify_failure(&endpoint, response).await);
        }
        let raw: ExplorerTransaction = decode_json(&endpoint, response).await?;
        Ok(IndexerLookup::Found(convert_transaction(tx_id, raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ACCEPTED_TX: &str = r#"{
        "type": "Accepted",
        "hash": "tx-1",
        "blockHash": "block-1",
        "timestamp": 1700000000000,
        "inputs": [
            {"outputRef": {"hint": 1, "key": "k"}, "address": "addr-a", "attoAlphAmount": "7000000000000000000000", "tokens": [{"id": "token-ayin", "amount": "5"}]}
        ],
        "outputs": [
            {"type": "AssetOutput", "hint": 2, "key": "k2", "attoAlphAmount": "6000000000000000000000", "address": "addr-b"},
            {"type": "ContractOutput", "hint": 3, "key": "k3", "attoAlphAmount": "1", "address": "contract-x", "tokens": [{"id": "token-ayin", "amount": "5"}]}
        ],
        "gasAmount": 20000,
        "gasPrice": "100000000000"
    }"#;

    #[tokio::test]
    async fn current_height_reads_chain_info() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/blockflow/chain-info")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("fromGroup".into(), "1".into()),
                Matcher::UrlEncoded("toGroup".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"currentHeight": 4242}"#)
            .create_async()
            .await;

        let client = FullnodeClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let height = client
            .current_height(ShardPair::new(1, 2))
            .await
            .expect("height query succeeds");
        assert_eq!(height, 4_242);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn main_chain_check_decodes_bare_boolean() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/blockflow/is-block-in-main-chain")
            .match_query(Matcher::UrlEncoded("blockHash".into(), "block-1".into()))
            .with_status(200)
            .with_body("false")
            .create_async()
            .await;

        let client = FullnodeClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let canonical = client
            .is_block_in_main_chain("block-1")
            .await
            .expect("main chain query succeeds");
        assert!(!canonical);
    }

    #[tokio::test]
    async fn node_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/blockflow/chain-info")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = FullnodeClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let error = client
            .current_height(ShardPair::new(0, 0))
            .await
            .expect_err("503 is an error");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn explorer_maps_accepted_record() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transactions/tx-1")
            .with_status(200)
            .with_body(ACCEPTED_TX)
            .create_async()
            .await;

        let client = ExplorerClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let lookup = client.lookup_transaction("tx-1").await.expect("lookup succeeds");
        let IndexerLookup::Found(tx) = lookup else {
            panic!("expected an indexed record");
        };
        assert!(tx.finalized);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].tokens[0].id, "token-ayin");
        assert_eq!(tx.outputs[0].kind, OutputKind::Asset);
        assert_eq!(tx.outputs[0].native_amount, "6000000000000000000000");
        assert!(tx.outputs[0].tokens.is_empty());
        assert_eq!(tx.outputs[1].kind, OutputKind::Contract);
    }

    #[tokio::test]
    async fn explorer_not_found_means_not_indexed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transactions/tx-missing")
            .with_status(404)
            .create_async()
            .await;

        let client = ExplorerClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let lookup = client
            .lookup_transaction("tx-missing")
            .await
            .expect("404 is not an error");
        assert_eq!(lookup, IndexerLookup::NotIndexed);
    }

    #[tokio::test]
    async fn explorer_pending_record_is_not_finalized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transactions/tx-2")
            .with_status(200)
            .with_body(r#"{"type":"Pending","hash":"tx-2","inputs":[],"outputs":[]}"#)
            .create_async()
            .await;

        let client = ExplorerClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let IndexerLookup::Found(tx) = client.lookup_transaction("tx-2").await.expect("lookup")
        else {
            panic!("expected a record");
        };
        assert!(!tx.finalized);
    }

    #[tokio::test]
    async fn explorer_unexpected_status_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transactions/tx-3")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let client = ExplorerClient::new(&server.url(), Duration::from_secs(2)).expect("client");
        let error = client
            .lookup_transaction("tx-3")
            .await
            .expect_err("400 is terminal");
        assert!(!error.is_retryable());
        assert!(matches!(
            error,
            RemoteError::UnexpectedStatus { status: 400, .. }
        ));
    }
}
