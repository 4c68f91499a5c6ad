//! Order data documents: the payloads carried (compressed, and usually encrypted) inside
//! `OrderData`. Key management documents use the S001 and H004 namespaces with public keys
//! as `ds:RSAKeyValue`.

use chrono::{DateTime, Utc};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

use super::{
    format_timestamp, invalid, parse_number, parse_timestamp, required_attr, text_opt, XmlMessage,
    AUTHENTICATION_VERSION_X002, ENCRYPTION_VERSION_E002, SIGNATURE_VERSION_A006,
};
use crate::codec::{base64_decode, base64_encode};
use crate::crypto::public_key_from_components;
use crate::error::Result;
use crate::xml::{Document, Element, DSIG_NS, H004_NS, S001_NS};

fn order_data_root(name: &str, ns: &str) -> Element {
    Element::new(name)
        .with_namespace(None, ns)
        .with_namespace(Some("ds"), DSIG_NS)
}

/// `PubKeyValue`: an RSA public key by its components, plus an optional creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKeyValue {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PubKeyValue {
    pub fn from_public_key(key: &RsaPublicKey, timestamp: Option<DateTime<Utc>>) -> Self {
        PubKeyValue {
            modulus: key.n().to_bytes_be(),
            exponent: key.e().to_bytes_be(),
            timestamp,
        }
    }

    pub fn to_public_key(&self) -> Result<RsaPublicKey> {
        public_key_from_components(&self.modulus, &self.exponent)
    }

    fn to_element(&self) -> Element {
        Element::new("PubKeyValue")
            .with_child(
                Element::prefixed("ds", "RSAKeyValue")
                    .with_child(Element::prefixed("ds", "Modulus").with_text(base64_encode(&self.modulus)))
                    .with_child(Element::prefixed("ds", "Exponent").with_text(base64_encode(&self.exponent))),
            )
            .with_opt_child(
                self.timestamp
                    .map(|t| Element::text_element("TimeStamp", format_timestamp(t))),
            )
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let key_value = cursor.required_in(Some(DSIG_NS), "RSAKeyValue")?;
        let timestamp = match cursor.optional_text("TimeStamp") {
            Some(t) => Some(parse_timestamp(&t)?),
            None => None,
        };
        cursor.finish()?;

        let mut key_cursor = key_value.cursor();
        let modulus = base64_decode(&key_cursor.required_text("Modulus")?)?;
        let exponent = base64_decode(&key_cursor.required_text("Exponent")?)?;
        key_cursor.finish()?;

        Ok(PubKeyValue {
            modulus,
            exponent,
            timestamp,
        })
    }
}

/// `<{info}><PubKeyValue/><{version_name}>version</{version_name}></{info}>`
fn pub_key_info(info: &str, key: &PubKeyValue, version_name: &str, version: &str) -> Element {
    Element::new(info)
        .with_child(key.to_element())
        .with_child(Element::text_element(version_name, version))
}

fn parse_pub_key_info(element: &Element, version_name: &str, expected: &str) -> Result<PubKeyValue> {
    let mut cursor = element.cursor();
    cursor.skip("X509Data");
    let key = PubKeyValue::from_element(cursor.required("PubKeyValue")?)?;
    let version = cursor.required_text(version_name)?;
    cursor.finish()?;
    if version != expected {
        return Err(invalid(format!("unsupported {version_name} {version}, expected {expected}")));
    }
    Ok(key)
}

/// INI order data: the subscriber's A006 signature key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePubKeyOrderData {
    pub signature_pub_key: PubKeyValue,
    pub partner_id: String,
    pub user_id: String,
}

impl XmlMessage for SignaturePubKeyOrderData {
    fn to_document(&self) -> Document {
        Document::new(
            order_data_root("SignaturePubKeyOrderData", S001_NS)
                .with_child(pub_key_info(
                    "SignaturePubKeyInfo",
                    &self.signature_pub_key,
                    "SignatureVersion",
                    SIGNATURE_VERSION_A006,
                ))
                .with_child(Element::text_element("PartnerID", self.partner_id.as_str()))
                .with_child(Element::text_element("UserID", self.user_id.as_str())),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(S001_NS, "SignaturePubKeyOrderData")?;
        let mut cursor = root.cursor();
        let signature_pub_key = parse_pub_key_info(
            cursor.required("SignaturePubKeyInfo")?,
            "SignatureVersion",
            SIGNATURE_VERSION_A006,
        )?;
        let partner_id = cursor.required_text("PartnerID")?;
        let user_id = cursor.required_text("UserID")?;
        cursor.finish()?;
        Ok(SignaturePubKeyOrderData {
            signature_pub_key,
            partner_id,
            user_id,
        })
    }
}

/// HIA order data: the subscriber's X002 authentication and E002 encryption keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiaRequestOrderData {
    pub authentication_pub_key: PubKeyValue,
    pub encryption_pub_key: PubKeyValue,
    pub partner_id: String,
    pub user_id: String,
}

impl XmlMessage for HiaRequestOrderData {
    fn to_document(&self) -> Document {
        Document::new(
            order_data_root("HIARequestOrderData", H004_NS)
                .with_child(pub_key_info(
                    "AuthenticationPubKeyInfo",
                    &self.authentication_pub_key,
                    "AuthenticationVersion",
                    AUTHENTICATION_VERSION_X002,
                ))
                .with_child(pub_key_info(
                    "EncryptionPubKeyInfo",
                    &self.encryption_pub_key,
                    "EncryptionVersion",
                    ENCRYPTION_VERSION_E002,
                ))
                .with_child(Element::text_element("PartnerID", self.partner_id.as_str()))
                .with_child(Element::text_element("UserID", self.user_id.as_str())),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H004_NS, "HIARequestOrderData")?;
        let mut cursor = root.cursor();
        let authentication_pub_key = parse_pub_key_info(
            cursor.required("AuthenticationPubKeyInfo")?,
            "AuthenticationVersion",
            AUTHENTICATION_VERSION_X002,
        )?;
        let encryption_pub_key = parse_pub_key_info(
            cursor.required("EncryptionPubKeyInfo")?,
            "EncryptionVersion",
            ENCRYPTION_VERSION_E002,
        )?;
        let partner_id = cursor.required_text("PartnerID")?;
        let user_id = cursor.required_text("UserID")?;
        cursor.finish()?;
        Ok(HiaRequestOrderData {
            authentication_pub_key,
            encryption_pub_key,
            partner_id,
            user_id,
        })
    }
}

/// HPB order data: the bank's authentication and encryption keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpbResponseOrderData {
    pub authentication_pub_key: PubKeyValue,
    pub encryption_pub_key: PubKeyValue,
    pub host_id: String,
}

impl XmlMessage for HpbResponseOrderData {
    fn to_document(&self) -> Document {
        Document::new(
            order_data_root("HPBResponseOrderData", H004_NS)
                .with_child(pub_key_info(
                    "AuthenticationPubKeyInfo",
                    &self.authentication_pub_key,
                    "AuthenticationVersion",
                    AUTHENTICATION_VERSION_X002,
                ))
                .with_child(pub_key_info(
                    "EncryptionPubKeyInfo",
                    &self.encryption_pub_key,
                    "EncryptionVersion",
                    ENCRYPTION_VERSION_E002,
                ))
                .with_child(Element::text_element("HostID", self.host_id.as_str())),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H004_NS, "HPBResponseOrderData")?;
        let mut cursor = root.cursor();
        let authentication_pub_key = parse_pub_key_info(
            cursor.required("AuthenticationPubKeyInfo")?,
            "AuthenticationVersion",
            AUTHENTICATION_VERSION_X002,
        )?;
        let encryption_pub_key = parse_pub_key_info(
            cursor.required("EncryptionPubKeyInfo")?,
            "EncryptionVersion",
            ENCRYPTION_VERSION_E002,
        )?;
        let host_id = cursor.required_text("HostID")?;
        cursor.finish()?;
        Ok(HpbResponseOrderData {
            authentication_pub_key,
            encryption_pub_key,
            host_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSignatureData {
    pub signature_version: String,
    pub signature_value: Vec<u8>,
    pub partner_id: String,
    pub user_id: String,
}

/// Electronic signatures sent along an upload, encrypted in `SignatureData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSignatureData {
    pub signatures: Vec<OrderSignatureData>,
}

impl XmlMessage for UserSignatureData {
    fn to_document(&self) -> Document {
        Document::new(
            Element::new("UserSignatureData")
                .with_namespace(None, S001_NS)
                .with_children(self.signatures.iter().map(|s| {
                    Element::new("OrderSignatureData")
                        .with_child(Element::text_element("SignatureVersion", s.signature_version.as_str()))
                        .with_child(Element::text_element("SignatureValue", base64_encode(&s.signature_value)))
                        .with_child(Element::text_element("PartnerID", s.partner_id.as_str()))
                        .with_child(Element::text_element("UserID", s.user_id.as_str()))
                })),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(S001_NS, "UserSignatureData")?;
        let mut cursor = root.cursor();
        let mut signatures = Vec::new();
        for element in cursor.repeated("OrderSignatureData") {
            let mut signature_cursor = element.cursor();
            let signature_version = signature_cursor.required_text("SignatureVersion")?;
            let signature_value = base64_decode(&signature_cursor.required_text("SignatureValue")?)?;
            let partner_id = signature_cursor.required_text("PartnerID")?;
            let user_id = signature_cursor.required_text("UserID")?;
            signature_cursor.finish()?;
            signatures.push(OrderSignatureData {
                signature_version,
                signature_value,
                partner_id,
                user_id,
            });
        }
        cursor.finish()?;
        if signatures.is_empty() {
            return Err(invalid("UserSignatureData without OrderSignatureData"));
        }
        Ok(UserSignatureData { signatures })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressInfo {
    pub name: Option<String>,
    pub street: Option<String>,
    pub post_code: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: String,
    pub currency: String,
    pub description: Option<String>,
    pub iban: String,
    pub bic: String,
    pub account_holder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    pub order_type: String,
    /// `Upload` or `Download`.
    pub transfer_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerInfo {
    pub address: AddressInfo,
    pub host_id: String,
    pub accounts: Vec<AccountInfo>,
    pub orders: Vec<OrderInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub authorisation_level: Option<String>,
    pub order_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub status: u32,
    pub name: Option<String>,
    pub permissions: Vec<Permission>,
}

impl PartnerInfo {
    fn to_element(&self) -> Element {
        let address = &self.address;
        Element::new("PartnerInfo")
            .with_child(
                Element::new("AddressInfo")
                    .with_opt_child(text_opt("Name", address.name.as_deref()))
                    .with_opt_child(text_opt("Street", address.street.as_deref()))
                    .with_opt_child(text_opt("PostCode", address.post_code.as_deref()))
                    .with_opt_child(text_opt("City", address.city.as_deref()))
                    .with_opt_child(text_opt("Region", address.region.as_deref()))
                    .with_opt_child(text_opt("Country", address.country.as_deref())),
            )
            .with_child(Element::new("BankInfo").with_child(Element::text_element("HostID", self.host_id.as_str())))
            .with_children(self.accounts.iter().map(|account| {
                let mut element = Element::new("AccountInfo")
                    .with_attr("Currency", account.currency.as_str())
                    .with_attr("ID", account.id.as_str());
                if let Some(description) = &account.description {
                    element.set_attr("Description", description.as_str());
                }
                element
                    .with_child(
                        Element::text_element("AccountNumber", account.iban.as_str()).with_attr("international", "true"),
                    )
                    .with_child(Element::text_element("BankCode", account.bic.as_str()).with_attr("international", "true"))
                    .with_opt_child(text_opt("AccountHolder", account.account_holder.as_deref()))
            }))
            .with_children(self.orders.iter().map(|order| {
                Element::new("OrderInfo")
                    .with_child(Element::text_element("OrderType", order.order_type.as_str()))
                    .with_child(Element::text_element("TransferType", order.transfer_type.as_str()))
                    .with_opt_child(text_opt("Description", order.description.as_deref()))
            }))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();

        let mut address_cursor = cursor.required("AddressInfo")?.cursor();
        let address = AddressInfo {
            name: address_cursor.optional_text("Name"),
            street: address_cursor.optional_text("Street"),
            post_code: address_cursor.optional_text("PostCode"),
            city: address_cursor.optional_text("City"),
            region: address_cursor.optional_text("Region"),
            country: address_cursor.optional_text("Country"),
        };
        address_cursor.finish()?;

        let mut bank_cursor = cursor.required("BankInfo")?.cursor();
        let host_id = bank_cursor.required_text("HostID")?;
        bank_cursor.skip("Parameter");
        bank_cursor.finish()?;

        let mut accounts = Vec::new();
        for account in cursor.repeated("AccountInfo") {
            let mut account_cursor = account.cursor();
            let iban = account_cursor.required_text("AccountNumber")?;
            let bic = account_cursor.required_text("BankCode")?;
            let account_holder = account_cursor.optional_text("AccountHolder");
            account_cursor.finish()?;
            accounts.push(AccountInfo {
                id: required_attr(account, "ID")?.to_string(),
                currency: account.attr("Currency").unwrap_or("EUR").to_string(),
                description: account.attr("Description").map(str::to_string),
                iban,
                bic,
                account_holder,
            });
        }

        let mut orders = Vec::new();
        for order in cursor.repeated("OrderInfo") {
            let mut order_cursor = order.cursor();
            let order_type = order_cursor.required_text("OrderType")?;
            let transfer_type = order_cursor.required_text("TransferType")?;
            let description = order_cursor.optional_text("Description");
            order_cursor.finish()?;
            orders.push(OrderInfo {
                order_type,
                transfer_type,
                description,
            });
        }
        cursor.finish()?;

        Ok(PartnerInfo {
            address,
            host_id,
            accounts,
            orders,
        })
    }
}

impl UserInfo {
    fn to_element(&self) -> Element {
        Element::new("UserInfo")
            .with_child(Element::text_element("UserID", self.user_id.as_str()).with_attr("Status", self.status.to_string()))
            .with_opt_child(text_opt("Name", self.name.as_deref()))
            .with_children(self.permissions.iter().map(|permission| {
                let mut element = Element::new("Permission");
                if let Some(level) = &permission.authorisation_level {
                    element.set_attr("AuthorisationLevel", level.as_str());
                }
                element.with_opt_child(
                    Some(permission.order_types.join(" "))
                        .filter(|types| !types.is_empty())
                        .map(|types| Element::text_element("OrderTypes", types)),
                )
            }))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let user = cursor.required("UserID")?;
        let name = cursor.optional_text("Name");
        let mut permissions = Vec::new();
        for permission in cursor.repeated("Permission") {
            let mut permission_cursor = permission.cursor();
            let order_types = permission_cursor
                .optional_text("OrderTypes")
                .map(|types| types.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            permission_cursor.finish()?;
            permissions.push(Permission {
                authorisation_level: permission.attr("AuthorisationLevel").map(str::to_string),
                order_types,
            });
        }
        cursor.finish()?;
        Ok(UserInfo {
            user_id: user.trimmed_text(),
            status: parse_number(required_attr(user, "Status")?, "Status")?,
            name,
            permissions,
        })
    }
}

/// HTD: what the bank knows about the partner and the requesting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtdResponseOrderData {
    pub partner: PartnerInfo,
    pub user: UserInfo,
}

impl XmlMessage for HtdResponseOrderData {
    fn to_document(&self) -> Document {
        Document::new(
            order_data_root("HTDResponseOrderData", H004_NS)
                .with_child(self.partner.to_element())
                .with_child(self.user.to_element()),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H004_NS, "HTDResponseOrderData")?;
        let mut cursor = root.cursor();
        let partner = PartnerInfo::from_element(cursor.required("PartnerInfo")?)?;
        let user = UserInfo::from_element(cursor.required("UserInfo")?)?;
        cursor.finish()?;
        Ok(HtdResponseOrderData { partner, user })
    }
}

/// HKD: like HTD, but listing every user of the partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HkdResponseOrderData {
    pub partner: PartnerInfo,
    pub users: Vec<UserInfo>,
}

impl XmlMessage for HkdResponseOrderData {
    fn to_document(&self) -> Document {
        Document::new(
            order_data_root("HKDResponseOrderData", H004_NS)
                .with_child(self.partner.to_element())
                .with_children(self.users.iter().map(UserInfo::to_element)),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H004_NS, "HKDResponseOrderData")?;
        let mut cursor = root.cursor();
        let partner = PartnerInfo::from_element(cursor.required("PartnerInfo")?)?;
        let users = cursor
            .repeated("UserInfo")
            .into_iter()
            .map(UserInfo::from_element)
            .collect::<Result<Vec<_>>>()?;
        cursor.finish()?;
        Ok(HkdResponseOrderData { partner, users })
    }
}
