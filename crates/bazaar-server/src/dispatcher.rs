//! Request decoding, routing and response encoding.
//!
//! [`read_request`] consumes exactly the bytes an opcode's schema defines
//! before anything is decoded, so a malformed request can never leave part
//! of itself on the socket. [`dispatch`] turns the raw fields into a typed
//! call and maps every soft failure to the opcode's failure response.

use std::io;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bazaar_shared::codec::{self, FrameBuf};
use bazaar_shared::constants::TRANSACTION_ERROR;
use bazaar_shared::protocol::{
    self as wire, Catalog, CatalogEntry, ProductEdit, ProductListing, ProfileUpdate, Proposal,
    PurchaseRequest, RatingSubmission, SaleRecord, SellerProduct, TransactionView,
};
use bazaar_shared::types::{normalize_username, ChatStatus, Decision, ProductRef};
use bazaar_shared::{Opcode, ProtocolError};
use bazaar_store::{Database, NewProduct, Product, ProductChanges, ProfileChanges, PurchaseScores};
use bytes::Bytes;
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::ServerError;
use crate::mailbox::Mailbox;
use crate::presence::PresenceRegistry;
use crate::session::Session;
use crate::store::Store;

/// Everything a connection handler can reach. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Store,
    pub presence: PresenceRegistry,
    pub mailbox: Mailbox,
    pub engine: Engine,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let store = Store::new(db);
        Self {
            mailbox: Mailbox::new(store.clone(), config.chat_history_limit),
            engine: Engine::new(store.clone()),
            presence: PresenceRegistry::new(),
            store,
            config: Arc::new(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A request whose fields were read from the socket but not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub opcode: Opcode,
    pub fields: Vec<Vec<u8>>,
}

impl RawRequest {
    fn raw(&self, idx: usize) -> Result<&[u8], ProtocolError> {
        self.fields
            .get(idx)
            .map(Vec::as_slice)
            .ok_or(ProtocolError::MissingField(idx))
    }

    fn text(&self, idx: usize) -> Result<String, ProtocolError> {
        codec::decode_text(self.raw(idx)?)
    }

    fn int(&self, idx: usize) -> Result<i64, ProtocolError> {
        codec::decode_int(self.raw(idx)?)
    }

    fn json<T: DeserializeOwned>(&self, idx: usize) -> Result<T, ProtocolError> {
        codec::decode_json(self.raw(idx)?)
    }

    /// A username field, normalized. Empty yields `None`.
    fn user(&self, idx: usize) -> Result<Option<String>, ProtocolError> {
        let name = normalize_username(&self.text(idx)?);
        Ok((!name.is_empty()).then_some(name))
    }

    fn required_user(&self, idx: usize) -> Result<String, ProtocolError> {
        self.user(idx)?
            .ok_or_else(|| ProtocolError::Malformed("empty username".into()))
    }
}

/// Read one request. Returns `Ok(None)` for a code outside the opcode table;
/// such requests are ignored without a response.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_blob: usize,
) -> io::Result<Option<RawRequest>> {
    let code_field = codec::read_short(reader).await?;
    let code = match codec::decode_text(&code_field) {
        Ok(code) => code,
        Err(_) => {
            debug!("Ignoring non-UTF-8 opcode");
            return Ok(None);
        }
    };

    let Some(opcode) = Opcode::from_code(&code) else {
        debug!(code = %code, "Ignoring unknown opcode");
        return Ok(None);
    };

    let schema = opcode.schema();
    let mut fields = Vec::with_capacity(schema.len());
    for kind in schema {
        fields.push(codec::read_field(reader, *kind, max_blob).await?);
    }
    Ok(Some(RawRequest { opcode, fields }))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A bare `'1'` / `'0'` flag.
    Flag(bool),
    /// Chat-status byte `'0'` / `'1'` / `'2'`.
    Status(ChatStatus),
    /// `'1'` followed by one JSON blob.
    Json(Vec<u8>),
    /// `'1'`, a JSON blob, then a raw image blob (empty when absent).
    Detail { json: Vec<u8>, image: Vec<u8> },
    /// A single short field (transaction id or the error token).
    Token(String),
    /// Nothing is written.
    Silent,
    /// Nothing is written and the connection is closed.
    Close,
}

impl Response {
    fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ServerError> {
        let json = serde_json::to_vec(value).map_err(ProtocolError::from)?;
        Ok(Response::Json(json))
    }

    /// Frame the response; `None` when nothing goes on the wire.
    pub fn encode(&self) -> Result<Option<Bytes>, ProtocolError> {
        let mut frame = FrameBuf::new();
        match self {
            Response::Flag(ok) => {
                frame.flag(*ok);
            }
            Response::Status(status) => {
                frame.byte(status.to_byte());
            }
            Response::Json(json) => {
                frame.flag(true).blob(json);
            }
            Response::Detail { json, image } => {
                frame.flag(true).blob(json).blob(image);
            }
            Response::Token(token) => {
                frame.short(token)?;
            }
            Response::Silent | Response::Close => return Ok(None),
        }
        Ok(Some(frame.freeze()))
    }
}

/// What the client receives when `opcode` fails.
fn failure(opcode: Opcode) -> Response {
    match opcode {
        Opcode::ProposeTransaction => Response::Token(TRANSACTION_ERROR.to_string()),
        Opcode::ChatStatus => Response::Status(ChatStatus::Offline),
        Opcode::RegisterPort => Response::Silent,
        Opcode::Logout => Response::Close,
        _ => Response::Flag(false),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one request for an authenticated session. Handler errors become the
/// opcode's failure response; socket I/O stays with the caller.
pub async fn dispatch(state: &AppState, session: &Session, request: RawRequest) -> Response {
    let opcode = request.opcode;
    debug!(user = %session.user, op = ?opcode, "Handling request");

    match handle(state, session, &request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(user = %session.user, op = ?opcode, error = %e, "Request failed");
            failure(opcode)
        }
    }
}

async fn handle(
    state: &AppState,
    session: &Session,
    req: &RawRequest,
) -> Result<Response, ServerError> {
    let user = session.user.as_str();

    match req.opcode {
        Opcode::ListCatalog => {
            let products = state.store.call(|db| db.catalog()).await?;
            let mut catalog = Catalog::new();
            for product in products {
                let entry = CatalogEntry(
                    product.name.clone(),
                    product.rating,
                    product.price,
                    encode_image(&product.image),
                );
                catalog.entry(product.seller).or_default().push(entry);
            }
            Response::json(&catalog)
        }

        Opcode::ListProduct => {
            let listing: ProductListing = req.json(0)?;
            let product = NewProduct {
                name: listing.name.trim().to_string(),
                seller: user.to_string(),
                image: decode_image(listing.image.as_deref())?,
                description: listing.description,
                price: listing.price,
                quantity: listing.quantity,
            };
            state.store.call(move |db| db.upsert_product(&product)).await?;
            Ok(Response::Flag(true))
        }

        Opcode::ProductDetail => {
            let lookup = ProductRef::parse(&req.text(0)?)?;
            let product = state
                .store
                .call(move |db| db.product(&lookup.name, lookup.seller.as_deref()))
                .await?;
            let detail = wire::ProductDetail {
                name: product.name,
                seller: product.seller,
                description: product.description,
                price: product.price,
                quantity: product.quantity,
                rating: product.rating,
                rating_count: product.rating_count,
            };
            Ok(Response::Detail {
                json: serde_json::to_vec(&detail).map_err(ProtocolError::from)?,
                image: product.image.unwrap_or_default(),
            })
        }

        Opcode::ListOwnSales => {
            let seller = user.to_string();
            let sales = state
                .store
                .call(move |db| db.sales_for_seller(&seller))
                .await?;
            let records: Vec<SaleRecord> = sales
                .into_iter()
                .map(|sale| SaleRecord {
                    product: sale.product,
                    buyer: sale.buyer,
                    recorded_at: sale.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                })
                .collect();
            Response::json(&records)
        }

        Opcode::PollUnread => {
            let lines = state.mailbox.poll_unread(user).await?;
            non_empty_json(&lines)
        }

        Opcode::ChatHistory => {
            let other = req.required_user(0)?;
            let lines = state.mailbox.history(user, &other).await?;
            non_empty_json(&lines)
        }

        Opcode::SendMessage | Opcode::StoreMessage => {
            let recipient = req.required_user(0)?;
            let body = req.text(1)?;
            let message = state.mailbox.send(user, &recipient, &body).await?;
            state.engine.on_chat_message(&message).await;
            Ok(Response::Flag(true))
        }

        Opcode::RegisterPort => {
            debug!(user = %user, "Ignoring deprecated port registration");
            Ok(Response::Silent)
        }

        Opcode::Logout => Ok(Response::Close),

        Opcode::Conversations => {
            let partners = state.mailbox.conversations(user).await?;
            Response::json(&partners)
        }

        Opcode::SellerProducts => {
            let seller = req.required_user(0)?;
            let products = state
                .store
                .call(move |db| db.seller_products(&seller))
                .await?;
            let shelf: Vec<SellerProduct> = products
                .into_iter()
                .map(|p| SellerProduct {
                    image: encode_image(&p.image),
                    name: p.name,
                    rating: p.rating,
                    price: p.price,
                    quantity: p.quantity,
                })
                .collect();
            Response::json(&shelf)
        }

        Opcode::ProposeTransaction => {
            let proposal: Proposal = req.json(0)?;
            let txn = state.engine.propose(user, proposal).await?;
            Ok(Response::Token(txn.id))
        }

        Opcode::ListTransactions => {
            let other = req.user(0)?;
            let txns = state.engine.list(user, other.as_deref()).await?;
            let views: Vec<TransactionView> = txns
                .into_iter()
                .map(|t| TransactionView {
                    id: t.id,
                    buyer: t.buyer,
                    seller: t.seller,
                    product: t.product,
                    date: t.date,
                    quantity: t.quantity,
                    status: t.status,
                })
                .collect();
            non_empty_json(&views)
        }

        Opcode::RespondTransaction => {
            let id = req.text(0)?;
            let decision: Decision = req.text(1)?.parse()?;
            state.engine.respond(user, &id, decision).await?;
            Ok(Response::Flag(true))
        }

        Opcode::CompleteTransaction => {
            let id = req.text(0)?;
            let product = req.text(1)?;
            let scores = PurchaseScores {
                product: req.int(2)?,
                person: req.int(3)?,
            };
            state.engine.complete(user, &id, &product, scores).await?;
            Ok(Response::Flag(true))
        }

        Opcode::PresenceCheck => {
            let other = req.required_user(0)?;
            Ok(Response::Flag(state.presence.is_online(&other).await))
        }

        Opcode::GetProfile => {
            let target = req.required_user(0)?;
            let profile = state.store.call(move |db| db.get_profile(&target)).await?;
            let summary = |p: &Product| wire::ProfileProduct {
                product_name: p.name.clone(),
                price: p.price,
                rating: p.rating,
                rating_count: p.rating_count,
                quantity: p.quantity,
            };
            let view = wire::Profile {
                username: profile.user.username.clone(),
                display_name: profile.user.display_name.clone(),
                profile_picture: encode_image(&profile.user.profile_picture),
                bio: profile.user.bio.clone(),
                avg_rating: profile.avg_rating,
                current_products: profile.current_products.iter().map(summary).collect(),
                previous_products: profile.previous_products.iter().map(summary).collect(),
            };
            Response::json(&view)
        }

        Opcode::UpdateProfile => {
            let update: ProfileUpdate = req.json(0)?;
            update_profile(state, user, update, false).await
        }

        Opcode::StoreReceived => {
            // Relayed messages would let a client pick any sender name.
            warn!(user = %user, "Rejecting relayed message");
            Ok(Response::Flag(false))
        }

        Opcode::PollFromUser => {
            let other = req.required_user(0)?;
            let lines = state.mailbox.poll_from(user, &other).await?;
            non_empty_json(&lines)
        }

        Opcode::SubmitRating => {
            let submission: RatingSubmission = req.json(0)?;
            state.engine.submit_rating(user, submission).await?;
            Ok(Response::Flag(true))
        }

        Opcode::DeleteProduct => {
            let name = req.text(0)?;
            let seller = user.to_string();
            state
                .store
                .call(move |db| db.delete_product(&name, &seller))
                .await?;
            Ok(Response::Flag(true))
        }

        Opcode::AlreadyPurchased => {
            let lookup = ProductRef::parse(&req.text(0)?)?;
            let seller = lookup
                .seller
                .ok_or_else(|| ProtocolError::Malformed("missing seller".into()))?;
            let buyer = user.to_string();
            let bought = state
                .store
                .call(move |db| db.already_purchased(&buyer, &seller, &lookup.name))
                .await?;
            Ok(Response::Flag(bought))
        }

        Opcode::DecrementStock => {
            let request: PurchaseRequest = req.json(0)?;
            state.engine.confirm_purchase(user, request).await?;
            Ok(Response::Flag(true))
        }

        Opcode::OpenChat => {
            let other = req.required_user(0)?;
            state.presence.mark_chat_open(user, &other).await;
            Ok(Response::Flag(true))
        }

        Opcode::CloseChat => {
            let other = req.required_user(0)?;
            state.presence.mark_chat_closed(user, &other).await;
            Ok(Response::Flag(true))
        }

        Opcode::ChatStatus => {
            let other = req.required_user(0)?;
            Ok(Response::Status(state.presence.chat_status(user, &other).await))
        }

        Opcode::HasUnread => {
            let other = req.required_user(0)?;
            Ok(Response::Flag(state.mailbox.has_unread(user, &other).await?))
        }

        Opcode::MarkRead => {
            let from = req.user(0)?;
            state.mailbox.mark_read(user, from.as_deref()).await?;
            Ok(Response::Flag(true))
        }

        Opcode::UpdateProfileFor => {
            let update: ProfileUpdate = req.json(0)?;
            update_profile(state, user, update, true).await
        }

        Opcode::EditProduct => {
            let edit: ProductEdit = req.json(0)?;
            let changes = ProductChanges {
                quantity: edit.quantity,
                price: edit.price,
                description: edit.description,
                image: decode_image(edit.image.as_deref())?,
            };
            let (owner, name) = (user.to_string(), edit.product_name.trim().to_string());
            state
                .store
                .call(move |db| db.edit_product(&owner, &name, &changes))
                .await?;
            Ok(Response::Flag(true))
        }
    }
}

/// Apply a profile update for the session user. When `named` is set the
/// payload must carry the session user's name; otherwise a name, if given,
/// still has to match.
async fn update_profile(
    state: &AppState,
    user: &str,
    update: ProfileUpdate,
    named: bool,
) -> Result<Response, ServerError> {
    match update.username.as_deref().map(normalize_username) {
        Some(target) if target != user => {
            return Err(ServerError::Forbidden(format!(
                "{user} cannot edit the profile of {target}"
            )));
        }
        None if named => {
            return Err(ProtocolError::Malformed("missing username".into()).into());
        }
        _ => {}
    }

    let changes = ProfileChanges {
        display_name: update.display_name,
        bio: update.bio,
        profile_picture: decode_image(update.profile_picture.as_deref())?,
    };
    let user = user.to_string();
    state
        .store
        .call(move |db| db.update_profile(&user, &changes))
        .await?;
    Ok(Response::Flag(true))
}

fn non_empty_json<T: Serialize>(items: &[T]) -> Result<Response, ServerError> {
    if items.is_empty() {
        Ok(Response::Flag(false))
    } else {
        Response::json(items)
    }
}

fn encode_image(image: &Option<Vec<u8>>) -> Option<String> {
    image.as_ref().map(|bytes| BASE64.encode(bytes))
}

/// Base64 image from a JSON payload. Absent or empty means "no image".
fn decode_image(raw: Option<&str>) -> Result<Option<Vec<u8>>, ServerError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(encoded) => {
            let bytes = BASE64.decode(encoded).map_err(ProtocolError::from)?;
            Ok(Some(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use bazaar_shared::constants::{SHORT_FIELD_LEN, TRANSACTION_ID_LEN};

    use super::*;
    use crate::presence::SessionHandle;

    fn short(text: &str) -> Vec<u8> {
        let mut field = vec![0u8; SHORT_FIELD_LEN];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    fn request(opcode: Opcode, fields: Vec<Vec<u8>>) -> RawRequest {
        RawRequest { opcode, fields }
    }

    fn setup() -> (tempfile::TempDir, AppState, Session, Session) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("dispatch.db")).unwrap();
        db.create_user("sam", "pw", "Sam").unwrap();
        db.create_user("bob", "pw", "Bob").unwrap();
        let state = AppState::new(db, ServerConfig::default());
        let peer = ([127, 0, 0, 1], 1).into();
        let sam = Session::new("sam".into(), SessionHandle::new(peer));
        let bob = Session::new("bob".into(), SessionHandle::new(peer));
        (dir, state, sam, bob)
    }

    async fn list_widget(state: &AppState, sam: &Session, quantity: i64) {
        let listing = serde_json::to_vec(&ProductListing {
            name: "Widget".into(),
            image: Some(BASE64.encode([1u8, 2, 3])),
            description: "A widget".into(),
            price: 2.5,
            quantity,
        })
        .unwrap();
        let response = dispatch(state, sam, request(Opcode::ListProduct, vec![listing])).await;
        assert_eq!(response, Response::Flag(true));
    }

    #[tokio::test]
    async fn test_read_request_consumes_schema() {
        let mut input = Vec::new();
        input.extend(short("7"));
        input.extend(short("bob"));
        input.extend(vec![b'x'; 4096]);
        input.extend(short("16"));
        input.extend(short("sam"));

        let mut reader = input.as_slice();
        let first = read_request(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(first.opcode, Opcode::SendMessage);
        assert_eq!(first.fields.len(), 2);
        assert_eq!(first.fields[1].len(), 4096);

        let second = read_request(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(second.opcode, Opcode::PresenceCheck);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_ignored() {
        let input = short("99");
        let mut reader = input.as_slice();
        assert_eq!(read_request(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversize_blob_is_fatal() {
        let mut input = short("2");
        input.extend(2048u128.to_be_bytes());
        let mut reader = input.as_slice();
        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_soft_failure() {
        let (_dir, state, sam, _bob) = setup();
        let response = dispatch(
            &state,
            &sam,
            request(Opcode::ListProduct, vec![b"{not json".to_vec()]),
        )
        .await;
        assert_eq!(response, Response::Flag(false));

        let response = dispatch(
            &state,
            &sam,
            request(Opcode::ProposeTransaction, vec![b"[]".to_vec()]),
        )
        .await;
        assert_eq!(response, Response::Token(TRANSACTION_ERROR.into()));
    }

    #[tokio::test]
    async fn test_catalog_and_detail() {
        let (_dir, state, sam, bob) = setup();
        list_widget(&state, &sam, 3).await;

        let Response::Json(json) =
            dispatch(&state, &bob, request(Opcode::ListCatalog, vec![])).await
        else {
            panic!("expected catalog");
        };
        let catalog: Catalog = serde_json::from_slice(&json).unwrap();
        assert_eq!(catalog["sam"][0].0, "Widget");
        assert_eq!(catalog["sam"][0].3, Some(BASE64.encode([1u8, 2, 3])));

        let Response::Detail { json, image } = dispatch(
            &state,
            &bob,
            request(Opcode::ProductDetail, vec![short("Widget|Sam")]),
        )
        .await
        else {
            panic!("expected detail");
        };
        let detail: wire::ProductDetail = serde_json::from_slice(&json).unwrap();
        assert_eq!(detail.quantity, 3);
        assert_eq!(image, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_polls_fail() {
        let (_dir, state, sam, _bob) = setup();
        for (opcode, fields) in [
            (Opcode::PollUnread, vec![]),
            (Opcode::ChatHistory, vec![short("bob")]),
            (Opcode::PollFromUser, vec![short("bob")]),
            (Opcode::ListTransactions, vec![short("")]),
        ] {
            assert_eq!(
                dispatch(&state, &sam, request(opcode, fields)).await,
                Response::Flag(false)
            );
        }
    }

    #[tokio::test]
    async fn test_transaction_round_trip() {
        let (_dir, state, sam, bob) = setup();
        list_widget(&state, &sam, 2).await;

        let proposal = serde_json::to_vec(&Proposal {
            buyer: "bob".into(),
            seller: "sam".into(),
            product: "Widget".into(),
            date: "2024-06-01".into(),
            quantity: 1,
        })
        .unwrap();
        let Response::Token(id) = dispatch(
            &state,
            &bob,
            request(Opcode::ProposeTransaction, vec![proposal]),
        )
        .await
        else {
            panic!("expected id");
        };
        assert_eq!(id.len(), TRANSACTION_ID_LEN);

        let respond = |answer: &str| {
            request(Opcode::RespondTransaction, vec![short(&id), short(answer)])
        };
        assert_eq!(
            dispatch(&state, &bob, respond("approved")).await,
            Response::Flag(false)
        );
        assert_eq!(
            dispatch(&state, &sam, respond("approved")).await,
            Response::Flag(true)
        );

        let complete = request(
            Opcode::CompleteTransaction,
            vec![short(&id), short("Widget"), short("5"), short("4")],
        );
        assert_eq!(
            dispatch(&state, &bob, complete.clone()).await,
            Response::Flag(true)
        );
        assert_eq!(dispatch(&state, &bob, complete).await, Response::Flag(false));

        let bought = request(Opcode::AlreadyPurchased, vec![short("Widget|sam")]);
        assert_eq!(dispatch(&state, &bob, bought).await, Response::Flag(true));
    }

    #[tokio::test]
    async fn test_relayed_messages_rejected() {
        let (_dir, state, sam, _bob) = setup();
        let response = dispatch(
            &state,
            &sam,
            request(Opcode::StoreReceived, vec![short("bob"), vec![b'h'; 4096]]),
        )
        .await;
        assert_eq!(response, Response::Flag(false));
    }

    #[tokio::test]
    async fn test_profile_update_for_other_user_rejected() {
        let (_dir, state, sam, _bob) = setup();
        let payload = |name: &str| {
            serde_json::to_vec(&ProfileUpdate {
                username: Some(name.into()),
                bio: Some("hello".into()),
                ..Default::default()
            })
            .unwrap()
        };

        assert_eq!(
            dispatch(
                &state,
                &sam,
                request(Opcode::UpdateProfileFor, vec![payload("bob")])
            )
            .await,
            Response::Flag(false)
        );
        assert_eq!(
            dispatch(
                &state,
                &sam,
                request(Opcode::UpdateProfileFor, vec![payload("Sam")])
            )
            .await,
            Response::Flag(true)
        );
        assert_eq!(
            state.store.database().get_user("sam").unwrap().bio,
            "hello"
        );
    }

    #[test]
    fn test_response_encoding() {
        assert_eq!(
            Response::Flag(true).encode().unwrap().unwrap().as_ref(),
            b"1"
        );
        assert_eq!(
            Response::Status(ChatStatus::InChatWithViewer)
                .encode()
                .unwrap()
                .unwrap()
                .as_ref(),
            b"2"
        );
        assert_eq!(Response::Silent.encode().unwrap(), None);

        let framed = Response::Json(b"[]".to_vec()).encode().unwrap().unwrap();
        assert_eq!(framed[0], b'1');
        assert_eq!(&framed[1..17], &2u128.to_be_bytes());
        assert_eq!(&framed[17..], b"[]");
    }
}
