use async_trait::async_trait;
use serde_json::json;

use super::{read_json, ChargeProvider, ChargeRequest, CreatedCharge};
use crate::error::L402Error;
use crate::payment::{format_minor_units, ChargeDescriptor, Rail, RailParams};

pub const DEFAULT_COINBASE_API_URL: &str = "https://api.commerce.coinbase.com";
const API_VERSION: &str = "2018-03-22";

pub const SUPPORTED_NETWORK: &str = "base";
pub const SUPPORTED_ASSET: &str = "USDC";

/// Coinbase Commerce fixed-price charges.
///
/// Charges are correlated by their charge code, which every
/// `charge:*` webhook carries. The `app_id` metadata tag lets several
/// deployments share one Commerce account.
pub struct CoinbaseCharges {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    app_id: String,
    redirect_url: String,
}

impl CoinbaseCharges {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        app_id: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            app_id: app_id.into(),
            redirect_url: redirect_url.into(),
        }
    }
}

/// Accept only the `base`/`USDC` pair. Missing fields take those defaults.
pub fn check_network_asset(params: &RailParams) -> Result<(), L402Error> {
    let network = params.network.as_deref().unwrap_or(SUPPORTED_NETWORK);
    let asset = params.asset.as_deref().unwrap_or(SUPPORTED_ASSET);

    if !network.eq_ignore_ascii_case(SUPPORTED_NETWORK)
        || !asset.eq_ignore_ascii_case(SUPPORTED_ASSET)
    {
        return Err(L402Error::Validation(format!(
            "unsupported network/asset {network}/{asset}; only {SUPPORTED_NETWORK}/{SUPPORTED_ASSET} is accepted"
        )));
    }
    Ok(())
}

#[async_trait]
impl ChargeProvider for CoinbaseCharges {
    fn rail(&self) -> Rail {
        Rail::Coinbase
    }

    fn validate_params(&self, params: &RailParams) -> Result<(), L402Error> {
        check_network_asset(params)
    }

    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        let offer = charge.offer;
        let body = json!({
            "name": offer.title,
            "description": offer.description,
            "pricing_type": "fixed_price",
            "local_price": {
                "amount": format_minor_units(offer.amount, 2),
                "currency": offer.currency,
            },
            "redirect_url": self.redirect_url,
            "metadata": {
                "app_id": self.app_id,
                "request_id": charge.request_id,
                "user_id": charge.user_id,
                "offer_id": offer.id,
            },
        });

        let response = self
            .client
            .post(format!("{}/charges", self.api_url.trim_end_matches('/')))
            .header("X-CC-Api-Key", &self.api_key)
            .header("X-CC-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| L402Error::provider(Rail::Coinbase, format!("request failed: {e}")))?;

        let data = read_json(Rail::Coinbase, response).await?;
        parse_charge(&data["data"])
    }
}

/// Build the descriptor from a `POST /charges` response `data` object.
pub fn parse_charge(data: &serde_json::Value) -> Result<CreatedCharge, L402Error> {
    let (Some(code), Some(hosted_url)) = (data["code"].as_str(), data["hosted_url"].as_str())
    else {
        return Err(L402Error::provider(
            Rail::Coinbase,
            "charge response missing code or hosted_url",
        ));
    };

    let address = data["web3_data"]["contract_addresses"][SUPPORTED_NETWORK]
        .as_str()
        .or_else(|| data["addresses"][SUPPORTED_NETWORK].as_str())
        .map(str::to_string);

    tracing::info!(charge_code = %code, "created Coinbase charge");

    Ok(CreatedCharge {
        correlation_id: code.to_string(),
        descriptor: ChargeDescriptor::Coinbase {
            checkout_url: hosted_url.to_string(),
            network: SUPPORTED_NETWORK.to_string(),
            asset: SUPPORTED_ASSET.to_string(),
            address,
        },
    })
}
