use actix_web::{web, HttpResponse, Responder};
use log::{error, warn};

use super::schema::{
    BalanceResponse, ChainResponse, ErrorResponse, MineRequest, MineResponse, TransactionRequest,
    TransactionResponse, ValidationResponse, WalletResponse,
};
use crate::blockchain::{
    Address, Block, Blockchain, BlockchainError, Transaction, TransactionError, Wallet,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Maps a rejected submission onto an HTTP response
fn rejection(err: &BlockchainError) -> HttpResponse {
    warn!("Rejected transaction: {}", err);

    match err {
        BlockchainError::TransactionError(TransactionError::Authorization) => {
            HttpResponse::Forbidden().json(ErrorResponse::new(err.to_string()))
        }
        _ => HttpResponse::BadRequest().json(ErrorResponse::new(err.to_string())),
    }
}

fn admit(blockchain: &Blockchain, transaction: Transaction) -> HttpResponse {
    let hash = transaction.calculate_hash();

    match blockchain.submit_transaction(transaction.clone()) {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: format!("Transaction will be added to Block {}", block_index),
            hash,
            block_index,
            transaction,
        }),
        Err(err) => rejection(&err),
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();
    let is_valid = blockchain.is_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
        difficulty: blockchain.difficulty(),
        mining_reward: blockchain.mining_reward(),
    })
}

/// Get the latest block
///
/// Returns the tip of the chain, which the next mined block will link to
#[utoipa::path(
    get,
    path = "/api/v1/chain/latest",
    responses(
        (status = 200, description = "Latest block retrieved successfully", body = Block)
    )
)]
pub async fn get_latest_block(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_last_block())
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_pending_transactions())
}

/// Create a new transaction
///
/// Signs a transfer with the supplied private key and adds it to the pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data", body = ErrorResponse),
        (status = 403, description = "Private key does not belong to the sender", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    let wallet = match Wallet::from_secret_hex(&request.private_key) {
        Ok(wallet) => wallet,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new(format!("Invalid private key: {}", err)));
        }
    };

    let mut transaction = Transaction::new(
        Address(request.sender),
        Address(request.recipient),
        request.amount,
    );

    if let Err(err) = transaction.sign(&wallet) {
        return rejection(&BlockchainError::from(err));
    }

    admit(&blockchain, transaction)
}

/// Submit a signed transaction
///
/// Adds a transaction signed elsewhere to the pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/submit",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction admitted", body = TransactionResponse),
        (status = 400, description = "Malformed, unsigned or wrongly signed transaction", body = ErrorResponse)
    )
)]
pub async fn submit_transaction(
    blockchain: BlockchainData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    admit(&blockchain, transaction.into_inner())
}

/// Mine a new block
///
/// Packages all pending transactions into a new block and queues the miner's reward
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let miner_address = Address(mine_req.into_inner().miner_address);

    // Proof of work is CPU bound; keep it off the async workers.
    let mined = web::block(move || {
        blockchain
            .mine_pending(&miner_address)
            .map(|block| (block, blockchain.len()))
    })
    .await;

    match mined {
        Ok(Ok((block, chain_length))) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
            chain_length,
        }),
        Ok(Err(err)) => HttpResponse::BadRequest()
            .json(ErrorResponse::new(format!("Failed to mine block: {}", err))),
        Err(err) => {
            error!("Mining worker failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Mining worker failed"))
        }
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    let response = match blockchain.validate() {
        Ok(()) => ValidationResponse {
            is_valid: true,
            fault: None,
        },
        Err(fault) => ValidationResponse {
            is_valid: false,
            fault: Some(fault.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Get wallet balance
///
/// Returns the balance of an address, counting mined blocks only
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Hex-encoded public key")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = blockchain.balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::LedgerConfig;

    use actix_web::{http::StatusCode, test, App};

    fn test_data() -> BlockchainData {
        web::Data::new(Blockchain::new(LedgerConfig {
            difficulty: 1,
            mining_reward: 100.0,
        }))
    }

    fn transfer_request(sender: &Wallet, recipient: &Wallet, amount: f64) -> TransactionRequest {
        TransactionRequest {
            sender: sender.address().0.clone(),
            recipient: recipient.address().0.clone(),
            amount,
            private_key: hex::encode(sender.export_secret_key()),
        }
    }

    #[actix_web::test]
    async fn test_transfer_mine_and_balance() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let sender = Wallet::new();
        let recipient = Wallet::new();
        let miner = Wallet::new();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(transfer_request(&sender, &recipient, 10.0))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: miner.address().0.clone(),
            })
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.transactions.len(), 1);
        assert!(mined.block.hash.starts_with('0'));
        assert_eq!(mined.chain_length, 2);

        let req = test::TestRequest::get().uri("/api/v1/chain/latest").to_request();
        let latest: Block = test::call_and_read_body_json(&app, req).await;
        assert_eq!(latest, mined.block);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/balance/{}", recipient.address()))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 10.0);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 2);
        assert!(chain.is_valid);
        assert_eq!(chain.difficulty, 1);
        assert_eq!(chain.mining_reward, 100.0);

        let req = test::TestRequest::get().uri("/api/v1/transactions/pending").to_request();
        let pending: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_reward());
    }

    #[actix_web::test]
    async fn test_foreign_key_is_forbidden() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let owner = Wallet::new();
        let intruder = Wallet::new();
        let recipient = Wallet::new();

        let mut request = transfer_request(&owner, &recipient, 5.0);
        request.private_key = hex::encode(intruder.export_secret_key());

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(request)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(data.get_pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_submit_externally_signed_transaction() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let sender = Wallet::new();
        let recipient = Wallet::new();
        let mut transaction =
            Transaction::new(sender.address().clone(), recipient.address().clone(), 3.0);
        transaction.sign(&sender).unwrap();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/submit")
            .set_json(&transaction)
            .to_request();
        let resp: TransactionResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.hash, transaction.calculate_hash());
        assert_eq!(resp.block_index, 1);

        let mut unsigned = transaction.clone();
        unsigned.signature = None;
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/submit")
            .set_json(&unsigned)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(data.get_pending_transactions(), vec![transaction]);
    }

    #[actix_web::test]
    async fn test_validate_reports_tampering() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let miner = Wallet::new();
        data.mine_pending(miner.address()).unwrap();
        data.mine_pending(miner.address()).unwrap();

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let resp: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.is_valid);
        assert!(resp.fault.is_none());

        data.tamper_with_block(2, |block| block.transactions[0].amount = 1.0e9);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let resp: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.is_valid);
        assert!(resp.fault.is_some());
    }

    #[actix_web::test]
    async fn test_create_wallet() {
        let app = test::init_service(App::new().configure(configure_routes)).await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let resp: WalletResponse = test::call_and_read_body_json(&app, req).await;

        let restored = Wallet::from_secret_hex(&resp.private_key).unwrap();
        assert_eq!(restored.address().0, resp.address);
    }
}
