use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-RPC client over one or more HTTP endpoints, rotating on failure.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<DynProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            providers.push(ProviderBuilder::new().connect_http(parsed_url).erased());
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
        })
    }

    fn get_provider(&self) -> &DynProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) {
        warn!(
            "RPC error on {}: {}, rotating provider",
            self.get_current_url(),
            error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => {
                        client.handle_error(&e.to_string());
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    /// Timestamp of `block_number`, or `None` when the node does not know the block.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let future = provider.get_block_by_number(BlockNumberOrTag::Number(block_number));

                match timeout(REQUEST_TIMEOUT, future).await {
                    Ok(Ok(block)) => Ok(block.map(|block| block.header.timestamp)),
                    Ok(Err(e)) => {
                        client.handle_error(&e.to_string());
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let filter = Filter::new()
                    .address(contract_address)
                    .event_signature(topic0)
                    .from_block(from_block)
                    .to_block(to_block);

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();

                        if error_str.contains("exceeds max results") {
                            debug!(
                                "Max results exceeded for blocks {}-{}, will split range",
                                from_block, to_block
                            );
                            // not worth retrying, the caller splits the range instead
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// Logs of `topic0` emitted by `contract_address` in the inclusive range.
    ///
    /// When the node refuses the range for returning too many results and
    /// suggests a narrower one, the range is fetched piecewise.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        fetch_in_pieces(from_block, to_block, move |from, to| {
            self.get_logs_internal(from, to, contract_address, topic0)
        })
        .await
    }
}

/// Fetches `[from_block, to_block]`, narrowing the request whenever the node
/// reports too many results. Only the upper bound of the node's suggestion is
/// used; every request starts right after the last block already fetched.
async fn fetch_in_pieces<T, F, Fut>(
    from_block: u64,
    to_block: u64,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut all_items = Vec::new();
    let mut current_from = from_block;
    let mut current_to = to_block;

    while current_from <= to_block {
        match fetch(current_from, current_to).await {
            Ok(items) => {
                all_items.extend(items);
                if current_to >= to_block {
                    break;
                }
                current_from = current_to + 1;
                current_to = to_block;
            }
            Err(e) => {
                let error_str = e.to_string();
                let suggested_to = if error_str.contains("exceeds max results") {
                    RpcClient::parse_max_results_error(&error_str).map(|(_, to)| to)
                } else {
                    None
                };

                let Some(suggested_to) = suggested_to else {
                    return Err(e);
                };
                if suggested_to < current_from || suggested_to >= current_to {
                    return Err(e);
                }

                info!(
                    "Hit max results limit for blocks {}-{}, narrowing to {}-{}",
                    current_from, current_to, current_from, suggested_to
                );
                current_to = suggested_to;
            }
        }
    }

    Ok(all_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suggested_range_from_node_error() {
        let message = "query exceeds max results 10000, retry with the range 100-150";
        assert_eq!(RpcClient::parse_max_results_error(message), Some((100, 150)));
        assert_eq!(RpcClient::parse_max_results_error("timeout"), None);
    }

    #[tokio::test]
    async fn split_range_keeps_blocks_before_the_suggestion() {
        let requests = std::sync::Mutex::new(Vec::new());
        let logs = fetch_in_pieces(100, 200, |from, to| {
            requests.lock().unwrap().push((from, to));
            async move {
                if (from, to) == (100, 200) {
                    Err(anyhow::anyhow!(
                        "query exceeds max results 10000, retry with the range 150-160"
                    ))
                } else {
                    Ok(vec![(from, to)])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            requests.into_inner().unwrap(),
            vec![(100, 200), (100, 160), (161, 200)]
        );
        assert_eq!(logs, vec![(100, 160), (161, 200)]);
    }

    #[tokio::test]
    async fn unhelpful_suggestion_fails_the_range() {
        let result: Result<Vec<u64>> = fetch_in_pieces(100, 200, |_, _| async {
            Err(anyhow::anyhow!(
                "query exceeds max results 10000, retry with the range 50-90"
            ))
        })
        .await;
        assert!(result.is_err());

        let result: Result<Vec<u64>> =
            fetch_in_pieces(100, 200, |_, _| async { Err(anyhow::anyhow!("connection reset")) })
                .await;
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        assert!(RpcClient::new(&[]).is_err());
    }

    #[test]
    fn rotation_cycles_through_endpoints() {
        let client = RpcClient::new(&[
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ])
        .unwrap();

        assert_eq!(client.get_current_url(), "http://localhost:8545");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8546");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8545");
    }
}
