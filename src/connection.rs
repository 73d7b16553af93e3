use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::address::{Address, ProgramId};
use crate::api::{
    AirdropRequest, BalanceResponse, ErrorBody, ProgramAccountsRequest, SlotResponse,
};
use crate::error::{MarketError, Result};
use crate::instruction::Transaction;
use crate::ledger::{AccountFilter, AccountLookup, KeyedAccount, Ledger, Receipt};

/// Where a client sends transactions and reads account state.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn submit(&self, tx: &Transaction) -> Result<Receipt>;

    async fn lookup(&self, address: &Address) -> Result<AccountLookup>;

    async fn program_accounts(
        &self,
        program: &ProgramId,
        filters: &[AccountFilter],
    ) -> Result<Vec<KeyedAccount>>;

    async fn balance(&self, address: &Address) -> Result<u64>;

    async fn current_slot(&self) -> Result<u64>;

    async fn airdrop(&self, address: &Address, lamports: u64) -> Result<u64>;
}

/// Talks to a ledger in the same process.
#[derive(Clone)]
pub struct LocalConnection {
    ledger: Arc<Ledger>,
}

impl LocalConnection {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn submit(&self, tx: &Transaction) -> Result<Receipt> {
        Ok(self.ledger.submit(tx)?)
    }

    async fn lookup(&self, address: &Address) -> Result<AccountLookup> {
        Ok(self.ledger.lookup(address))
    }

    async fn program_accounts(
        &self,
        program: &ProgramId,
        filters: &[AccountFilter],
    ) -> Result<Vec<KeyedAccount>> {
        Ok(self.ledger.program_accounts(program, filters))
    }

    async fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self.ledger.balance(address))
    }

    async fn current_slot(&self) -> Result<u64> {
        Ok(self.ledger.current_slot())
    }

    async fn airdrop(&self, address: &Address, lamports: u64) -> Result<u64> {
        Ok(self.ledger.airdrop(address, lamports)?)
    }
}

/// Talks to an `a2a-node` over HTTP.
#[derive(Clone)]
pub struct HttpConnection {
    client: Client,
    base_url: String,
}

impl HttpConnection {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode a node response, turning error bodies back into typed errors.
async fn read<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await?;
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            error: Some(error), ..
        }) => Err(MarketError::Protocol(error)),
        Ok(body) => Err(MarketError::Remote {
            status: status.as_u16(),
            message: body.message,
        }),
        Err(_) => Err(MarketError::Remote {
            status: status.as_u16(),
            message: text,
        }),
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn submit(&self, tx: &Transaction) -> Result<Receipt> {
        let response = self
            .client
            .post(self.url("/transactions"))
            .json(tx)
            .send()
            .await?;
        read(response).await
    }

    async fn lookup(&self, address: &Address) -> Result<AccountLookup> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}", address)))
            .send()
            .await?;
        read(response).await
    }

    async fn program_accounts(
        &self,
        program: &ProgramId,
        filters: &[AccountFilter],
    ) -> Result<Vec<KeyedAccount>> {
        let response = self
            .client
            .post(self.url(&format!("/programs/{}/accounts", program)))
            .json(&ProgramAccountsRequest {
                filters: filters.to_vec(),
            })
            .send()
            .await?;
        read(response).await
    }

    async fn balance(&self, address: &Address) -> Result<u64> {
        let response = self
            .client
            .get(self.url(&format!("/balances/{}", address)))
            .send()
            .await?;
        let body: BalanceResponse = read(response).await?;
        Ok(body.lamports)
    }

    async fn current_slot(&self) -> Result<u64> {
        let response = self.client.get(self.url("/slot")).send().await?;
        let body: SlotResponse = read(response).await?;
        Ok(body.slot)
    }

    async fn airdrop(&self, address: &Address, lamports: u64) -> Result<u64> {
        let response = self
            .client
            .post(self.url("/airdrop"))
            .json(&AirdropRequest {
                address: *address,
                lamports,
            })
            .send()
            .await?;
        let body: BalanceResponse = read(response).await?;
        Ok(body.lamports)
    }
}
