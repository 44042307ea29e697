//! Open Payments Data Model
//!
//! Request and resource types exchanged with authorization and resource
//! servers. Field names follow the protocol's camelCase JSON.

use serde::{Deserialize, Serialize};

/// Payment method used for every quote
pub const ILP_METHOD: &str = "ilp";

/// Resolved metadata for one wallet address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddress {
    /// Wallet address URL, also its identifier
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,

    /// Asset code, e.g. "USD"
    pub asset_code: String,

    /// Number of decimal places in one major unit
    pub asset_scale: u8,

    /// Authorization server (grant endpoint)
    pub auth_server: String,

    /// Resource server hosting incoming/outgoing payments and quotes
    pub resource_server: String,
}

/// Amount in minor units
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    /// Integer value as a string of digits
    pub value: String,
    pub asset_code: String,
    pub asset_scale: u8,
}

impl Amount {
    pub fn new(value: impl Into<String>, asset_code: impl Into<String>, asset_scale: u8) -> Self {
        Self {
            value: value.into(),
            asset_code: asset_code.into(),
            asset_scale,
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} (scale {})", self.value, self.asset_code, self.asset_scale)
    }
}

/// Resource a grant gives access to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessType {
    IncomingPayment,
    Quote,
    OutgoingPayment,
}

impl AccessType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncomingPayment => "incoming-payment",
            Self::Quote => "quote",
            Self::OutgoingPayment => "outgoing-payment",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Create,
    Read,
    List,
    Complete,
}

/// Spending limits attached to an outgoing-payment access item
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_amount: Option<Amount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_amount: Option<Amount>,
}

/// One entry of a grant's requested access
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessItem {
    #[serde(rename = "type")]
    pub access_type: AccessType,

    pub actions: Vec<Action>,

    /// Wallet address the access is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

impl AccessItem {
    /// Capability to create (and complete) incoming payments
    pub fn incoming_payment() -> Self {
        Self {
            access_type: AccessType::IncomingPayment,
            actions: vec![Action::Create, Action::Read, Action::Complete],
            identifier: None,
            limits: None,
        }
    }

    /// Capability to create quotes
    pub fn quote() -> Self {
        Self {
            access_type: AccessType::Quote,
            actions: vec![Action::Create, Action::Read],
            identifier: None,
            limits: None,
        }
    }

    /// Capability to spend at most `debit_amount` from `wallet`
    pub fn outgoing_payment(wallet: impl Into<String>, debit_amount: Amount) -> Self {
        Self {
            access_type: AccessType::OutgoingPayment,
            actions: vec![Action::Create, Action::Read],
            identifier: Some(wallet.into()),
            limits: Some(Limits {
                debit_amount: Some(debit_amount),
                receive_amount: None,
            }),
        }
    }
}

/// Where the authorization server sends the user after consent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractFinish {
    /// Always "redirect"
    pub method: String,
    pub uri: String,
    /// Client nonce, mixed into the callback hash
    pub nonce: String,
}

/// Interaction requested alongside a grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractRequest {
    pub start: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<InteractFinish>,
}

impl InteractRequest {
    /// Redirect start, callback to `uri` when the user is done
    pub fn redirect(uri: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            start: vec!["redirect".into()],
            finish: Some(InteractFinish {
                method: "redirect".into(),
                uri: uri.into(),
                nonce: nonce.into(),
            }),
        }
    }

    /// Redirect start without a finish method; the client polls the continuation
    pub fn redirect_without_finish() -> Self {
        Self {
            start: vec!["redirect".into()],
            finish: None,
        }
    }
}

/// Grant request body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub access: Vec<AccessItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interact: Option<InteractRequest>,
}

impl GrantRequest {
    pub fn new(access: AccessItem) -> Self {
        Self {
            access: vec![access],
            interact: None,
        }
    }

    pub fn with_interaction(mut self, interact: InteractRequest) -> Self {
        self.interact = Some(interact);
        self
    }

    /// Access type of the first requested item
    pub fn access_type(&self) -> Option<AccessType> {
        self.access.first().map(|item| item.access_type)
    }
}

/// Token usable against a resource server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_url: Option<String>,
}

/// Handle for continuing a grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub uri: String,
    pub access_token: String,

    /// Suggested polling interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
}

/// Handle for sending the user to the authorization server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub redirect_url: String,

    /// Server nonce, mixed into the callback hash
    pub finish_nonce: Option<String>,
}

/// Result of a grant request or continuation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Continuation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<Interaction>,
}

impl Grant {
    /// A grant is finalized once it carries a usable access token
    pub const fn is_finalized(&self) -> bool {
        self.access_token.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPaymentRequest {
    pub wallet_address: String,
    pub incoming_amount: Amount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// A receivable on the receiver's resource server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPayment {
    pub id: String,
    pub wallet_address: String,

    #[serde(default)]
    pub incoming_amount: Option<Amount>,

    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub wallet_address: String,
    /// Incoming payment URL
    pub receiver: String,
    pub method: String,
}

impl QuoteRequest {
    pub fn ilp(wallet_address: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            receiver: receiver.into(),
            method: ILP_METHOD.into(),
        }
    }
}

/// Priced commitment to pay a receivable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub wallet_address: String,
    pub receiver: String,
    pub debit_amount: Amount,
    pub receive_amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPaymentRequest {
    pub wallet_address: String,
    pub quote_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPayment {
    pub id: String,
    pub wallet_address: String,

    #[serde(default)]
    pub quote_id: Option<String>,

    #[serde(default)]
    pub debit_amount: Option<Amount>,
}
