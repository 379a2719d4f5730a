//! # bazaar-client
//!
//! Async client for the marketplace wire protocol. A [`MarketClient`] owns
//! one authenticated TCP connection and exposes one method per request code;
//! requests are strictly lockstep, so every method writes a full request and
//! reads its full response before returning.

pub mod error;

use std::net::SocketAddr;

use bazaar_shared::codec::{self, FrameBuf};
use bazaar_shared::constants::{
    AUTH_LOGIN, AUTH_SIGNUP, DEFAULT_MAX_PAYLOAD, FIELD_SEPARATOR, TRANSACTION_ERROR,
};
use bazaar_shared::protocol::{
    Catalog, ChatLine, ProductDetail, ProductEdit, ProductListing, Profile, ProfileUpdate,
    Proposal, PurchaseRequest, RatingSubmission, SaleRecord, SellerProduct, TransactionView,
};
use bazaar_shared::types::{normalize_username, ChatStatus, Decision, ProductRef};
use bazaar_shared::{Opcode, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

pub use error::{ClientError, Result};

/// One authenticated connection to a marketplace server.
pub struct MarketClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    user: String,
    peer: SocketAddr,
    max_payload: usize,
}

impl MarketClient {
    async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            user: String::new(),
            peer,
            max_payload: DEFAULT_MAX_PAYLOAD,
        })
    }

    /// Connect and log in as an existing user.
    pub async fn login<A: ToSocketAddrs>(addr: A, username: &str, password: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.send_shorts(&[AUTH_LOGIN, username]).await?;
        if !client.read_flag().await? {
            return Err(ClientError::Auth("unknown user"));
        }
        client.send_shorts(&[password]).await?;
        if !client.read_flag().await? {
            return Err(ClientError::Auth("bad credentials or already online"));
        }
        client.user = normalize_username(username);
        debug!(user = %client.user, peer = %client.peer, "Logged in");
        Ok(client)
    }

    /// Connect, register a new account and stay logged in as it.
    pub async fn signup<A: ToSocketAddrs>(
        addr: A,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.send_shorts(&[AUTH_SIGNUP, username]).await?;
        if !client.read_flag().await? {
            return Err(ClientError::Auth("username unavailable"));
        }
        let credentials = format!("{display_name}{FIELD_SEPARATOR}{password}");
        client.send_shorts(&[&credentials]).await?;
        if !client.read_flag().await? {
            return Err(ClientError::Auth("registration failed"));
        }
        client.user = normalize_username(username);
        debug!(user = %client.user, peer = %client.peer, "Signed up");
        Ok(client)
    }

    /// The normalized name this connection is authenticated as.
    pub fn username(&self) -> &str {
        &self.user
    }

    /// Cap on blobs accepted from the server.
    pub fn set_max_payload(&mut self, max: usize) {
        self.max_payload = max;
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    pub async fn catalog(&mut self) -> Result<Catalog> {
        self.send(request(Opcode::ListCatalog)?).await?;
        self.json_reply(Opcode::ListCatalog).await
    }

    /// List a new product or restock an existing one.
    pub async fn list_product(&mut self, listing: &ProductListing) -> Result<bool> {
        self.send_json(Opcode::ListProduct, listing).await?;
        self.read_flag().await
    }

    /// Product fields and raw image bytes (empty when there is no image).
    pub async fn product_detail(
        &mut self,
        name: &str,
        seller: Option<&str>,
    ) -> Result<Option<(ProductDetail, Vec<u8>)>> {
        let lookup = ProductRef {
            name: name.to_string(),
            seller: seller.map(str::to_string),
        };
        self.send_short(Opcode::ProductDetail, &lookup.to_field())
            .await?;
        if !self.read_flag().await? {
            return Ok(None);
        }
        let detail = self.read_json().await?;
        let image = codec::read_blob(&mut self.reader, self.max_payload).await?;
        Ok(Some((detail, image)))
    }

    pub async fn own_sales(&mut self) -> Result<Vec<SaleRecord>> {
        self.send(request(Opcode::ListOwnSales)?).await?;
        self.json_reply(Opcode::ListOwnSales).await
    }

    pub async fn seller_products(&mut self, seller: &str) -> Result<Vec<SellerProduct>> {
        self.send_short(Opcode::SellerProducts, seller).await?;
        self.json_reply(Opcode::SellerProducts).await
    }

    pub async fn delete_product(&mut self, name: &str) -> Result<bool> {
        self.send_short(Opcode::DeleteProduct, name).await?;
        self.read_flag().await
    }

    pub async fn edit_product(&mut self, edit: &ProductEdit) -> Result<bool> {
        self.send_json(Opcode::EditProduct, edit).await?;
        self.read_flag().await
    }

    pub async fn already_purchased(&mut self, product: &str, seller: &str) -> Result<bool> {
        let lookup = format!("{product}{FIELD_SEPARATOR}{seller}");
        self.send_short(Opcode::AlreadyPurchased, &lookup).await?;
        self.read_flag().await
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    pub async fn send_message(&mut self, to: &str, body: &str) -> Result<bool> {
        self.send_message_as(Opcode::SendMessage, to, body).await
    }

    pub async fn store_message(&mut self, to: &str, body: &str) -> Result<bool> {
        self.send_message_as(Opcode::StoreMessage, to, body).await
    }

    /// Relay a message received out of band. Servers refuse these.
    pub async fn store_received(&mut self, from: &str, body: &str) -> Result<bool> {
        self.send_message_as(Opcode::StoreReceived, from, body).await
    }

    async fn send_message_as(&mut self, opcode: Opcode, user: &str, body: &str) -> Result<bool> {
        let mut frame = request(opcode)?;
        frame.short(user)?.body(body)?;
        self.send(frame).await?;
        self.read_flag().await
    }

    /// Every unread message, marked read by the server.
    pub async fn poll_unread(&mut self) -> Result<Vec<ChatLine>> {
        self.send(request(Opcode::PollUnread)?).await?;
        self.list_reply().await
    }

    /// Unread messages from one user, marked read by the server.
    pub async fn poll_from(&mut self, user: &str) -> Result<Vec<ChatLine>> {
        self.send_short(Opcode::PollFromUser, user).await?;
        self.list_reply().await
    }

    pub async fn chat_history(&mut self, user: &str) -> Result<Vec<ChatLine>> {
        self.send_short(Opcode::ChatHistory, user).await?;
        self.list_reply().await
    }

    pub async fn conversations(&mut self) -> Result<Vec<String>> {
        self.send(request(Opcode::Conversations)?).await?;
        self.json_reply(Opcode::Conversations).await
    }

    pub async fn has_unread(&mut self, user: &str) -> Result<bool> {
        self.send_short(Opcode::HasUnread, user).await?;
        self.read_flag().await
    }

    /// Mark messages from `from` read, or all of them when `None`.
    pub async fn mark_read(&mut self, from: Option<&str>) -> Result<bool> {
        self.send_short(Opcode::MarkRead, from.unwrap_or_default())
            .await?;
        self.read_flag().await
    }

    pub async fn open_chat(&mut self, user: &str) -> Result<bool> {
        self.send_short(Opcode::OpenChat, user).await?;
        self.read_flag().await
    }

    pub async fn close_chat(&mut self, user: &str) -> Result<bool> {
        self.send_short(Opcode::CloseChat, user).await?;
        self.read_flag().await
    }

    pub async fn chat_status(&mut self, user: &str) -> Result<ChatStatus> {
        self.send_short(Opcode::ChatStatus, user).await?;
        let b = codec::read_byte(&mut self.reader).await?;
        ChatStatus::from_byte(b).ok_or_else(|| ProtocolError::UnexpectedFlag(b).into())
    }

    pub async fn is_online(&mut self, user: &str) -> Result<bool> {
        self.send_short(Opcode::PresenceCheck, user).await?;
        self.read_flag().await
    }

    /// Legacy listener-port announcement; the server never answers it.
    pub async fn register_port(&mut self, port: u16) -> Result<()> {
        self.send_short(Opcode::RegisterPort, &port.to_string())
            .await
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Propose a purchase. Returns the new transaction id, or `None` when the
    /// server refused the proposal.
    pub async fn propose(&mut self, proposal: &Proposal) -> Result<Option<String>> {
        self.send_json(Opcode::ProposeTransaction, proposal).await?;
        let raw = codec::read_short(&mut self.reader).await?;
        let token = codec::decode_text(&raw)?;
        Ok((token != TRANSACTION_ERROR).then_some(token))
    }

    /// Transactions involving this user, optionally narrowed to one
    /// counterpart, newest first.
    pub async fn transactions(&mut self, with: Option<&str>) -> Result<Vec<TransactionView>> {
        self.send_short(Opcode::ListTransactions, with.unwrap_or_default())
            .await?;
        self.list_reply().await
    }

    pub async fn respond(&mut self, id: &str, decision: Decision) -> Result<bool> {
        let mut frame = request(Opcode::RespondTransaction)?;
        frame.short(id)?.short(decision.target_status().as_str())?;
        self.send(frame).await?;
        self.read_flag().await
    }

    pub async fn complete(
        &mut self,
        id: &str,
        product: &str,
        product_score: i64,
        seller_score: i64,
    ) -> Result<bool> {
        let mut frame = request(Opcode::CompleteTransaction)?;
        frame
            .short(id)?
            .short(product)?
            .short(&product_score.to_string())?
            .short(&seller_score.to_string())?;
        self.send(frame).await?;
        self.read_flag().await
    }

    /// As the seller of completed transaction `id`, rate its buyer.
    pub async fn rate_buyer(&mut self, id: &str, product: &str, score: i64) -> Result<bool> {
        self.complete(id, product, score, score).await
    }

    pub async fn submit_rating(&mut self, rating: &RatingSubmission) -> Result<bool> {
        self.send_json(Opcode::SubmitRating, rating).await?;
        self.read_flag().await
    }

    /// Settle a purchase agreed in chat.
    pub async fn confirm_purchase(&mut self, purchase: &PurchaseRequest) -> Result<bool> {
        self.send_json(Opcode::DecrementStock, purchase).await?;
        self.read_flag().await
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    pub async fn profile(&mut self, user: &str) -> Result<Option<Profile>> {
        self.send_short(Opcode::GetProfile, user).await?;
        if self.read_flag().await? {
            Ok(Some(self.read_json().await?))
        } else {
            Ok(None)
        }
    }

    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> Result<bool> {
        self.send_json(Opcode::UpdateProfile, update).await?;
        self.read_flag().await
    }

    /// Update with an explicit target username, which must be our own.
    pub async fn update_profile_for(&mut self, update: &ProfileUpdate) -> Result<bool> {
        self.send_json(Opcode::UpdateProfileFor, update).await?;
        self.read_flag().await
    }

    /// Log out and wait for the server to close the connection.
    pub async fn logout(mut self) -> Result<()> {
        self.send(request(Opcode::Logout)?).await?;
        let mut rest = [0u8; 1];
        match self.reader.read(&mut rest).await? {
            0 => {
                debug!(user = %self.user, "Logged out");
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedFlag(rest[0]).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    /// Write arbitrary bytes to the connection.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        codec::write_frame(&mut self.writer, bytes::Bytes::copy_from_slice(bytes)).await?;
        Ok(())
    }

    /// Read one `'1'` / `'0'` flag.
    pub async fn read_flag(&mut self) -> Result<bool> {
        Ok(codec::read_flag(&mut self.reader).await?)
    }

    // -----------------------------------------------------------------------
    // Framing helpers
    // -----------------------------------------------------------------------

    async fn send(&mut self, frame: FrameBuf) -> Result<()> {
        codec::write_frame(&mut self.writer, frame.freeze()).await?;
        Ok(())
    }

    async fn send_shorts(&mut self, fields: &[&str]) -> Result<()> {
        let mut frame = FrameBuf::new();
        for field in fields {
            frame.short(field)?;
        }
        self.send(frame).await
    }

    async fn send_short(&mut self, opcode: Opcode, arg: &str) -> Result<()> {
        let mut frame = request(opcode)?;
        frame.short(arg)?;
        self.send(frame).await
    }

    async fn send_json<T: Serialize>(&mut self, opcode: Opcode, value: &T) -> Result<()> {
        let mut frame = request(opcode)?;
        frame.json(value)?;
        self.send(frame).await
    }

    async fn read_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let raw = codec::read_blob(&mut self.reader, self.max_payload).await?;
        Ok(codec::decode_json(&raw)?)
    }

    /// `'1'` + JSON, where `'0'` is an error.
    async fn json_reply<T: DeserializeOwned>(&mut self, opcode: Opcode) -> Result<T> {
        if self.read_flag().await? {
            self.read_json().await
        } else {
            Err(ClientError::Rejected(opcode))
        }
    }

    /// `'1'` + JSON list, where `'0'` means the list is empty.
    async fn list_reply<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        if self.read_flag().await? {
            self.read_json().await
        } else {
            Ok(Vec::new())
        }
    }
}

fn request(opcode: Opcode) -> Result<FrameBuf> {
    let mut frame = FrameBuf::new();
    frame.short(opcode.code())?;
    Ok(frame)
}
