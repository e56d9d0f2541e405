//! FortuneBlock Lottery Contract
//!
//! A custodial, round-based lottery. The admin opens time-boxed lotteries
//! with a fixed entry fee; participants deposit the exact fee to enter, and
//! once the deadline passes anyone may finalize: a lottery with entries pays
//! the pool (net of the platform fee) to one winner, an empty lottery is
//! cancelled.
//!
//! ## Lottery Flow
//! 1. Admin calls `create_lottery` → sequential id, `end_time = now + duration`.
//! 2. Participants call `deposit` before `end_time` → exact-fee tokens
//!    transfer in, one entry per address.
//! 3. Anyone calls `finalize` once `now >= end_time` → winner drawn and
//!    paid, fee routed to the treasury; with zero entries the lottery is
//!    cancelled instead.
//!
//! ## Winner Selection
//! The draw seed is `sha256(lottery_id || ledger_timestamp ||
//! ledger_sequence || participants…)` taken at finalization time, and the
//! winner index is the first 8 seed bytes (big-endian) mod the participant
//! count. The ledger values are unknown while deposits are open, and the
//! seed is stored on the lottery so the draw can be replayed by anyone.
//!
//! ## Fees
//! `fee = prize_pool * fee_bps / 10000`, rounded down; the winner receives
//! `prize_pool - fee`, so the two legs always sum to the pool. If the
//! payout transfer cannot complete, the drawn winner is kept on record, the
//! lottery stays `InProgress`, and a later `finalize` retries settlement
//! with the same winner.
//!
//! ## Profiles
//! Every participant accrues a profile (participations, wins, winnings).
//! A display username can be bound once per address and is unique across
//! the platform; participation itself never requires one.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, token::TokenClient,
    Address, Bytes, BytesN, Env, String, Vec,
};

use shared::{calculate_fee, BASIS_POINTS_DIVISOR};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

/// Upper bound on a registered username, in bytes.
pub const MAX_USERNAME_LEN: u32 = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    NotAuthorized = 3,
    InvalidFeeBps = 4,
    InvalidParameters = 5,
    LotteryNotFound = 6,
    LotteryClosed = 7,
    WrongAmount = 8,
    AlreadyParticipated = 9,
    NotYetEnded = 10,
    AlreadyFinalized = 11,
    EmptyUsername = 12,
    UsernameTooLong = 13,
    AlreadyRegistered = 14,
    UsernameTaken = 15,
    Overflow = 16,
}

// ---------------------------------------------------------------------------
// Storage types
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Admin,
    Token,
    Treasury,
    FeeBps,
    NextLotteryId,
    Lottery(u64),
    Entry(u64, Address),
    Profile(Address),
    UsernameOwner(String),
}

/// Lifecycle state of a lottery. Serialized by ordinal — clients index a
/// parallel label array by this value, so the ordering is frozen.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LotteryStatus {
    InProgress = 0,
    Ended = 1,
    Cancelled = 2,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lottery {
    pub id: u64,
    pub entry_fee: i128,
    pub end_time: u64,
    /// Sum of deposits while open; after settlement, the amount actually
    /// paid to the winner.
    pub prize_pool: i128,
    /// Entrants in deposit order. The order feeds the winner index, so it
    /// is never reordered.
    pub participants: Vec<Address>,
    pub status: LotteryStatus,
    pub winner: Option<Address>,
    /// Seed the winner index was derived from, kept for replay verification.
    pub draw_seed: Option<BytesN<32>>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserProfile {
    /// Empty until `register_username` binds one.
    pub username: String,
    /// Lottery ids entered, in chronological order.
    pub participated: Vec<u64>,
    /// Lottery ids won, a subset of `participated`.
    pub won: Vec<u64>,
    pub total_winnings: i128,
    pub total_participations: u32,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct UsernameRegistered {
    #[topic]
    pub user: Address,
    pub username: String,
}

#[contractevent]
pub struct LotteryCreated {
    #[topic]
    pub lottery_id: u64,
    pub entry_fee: i128,
    pub end_time: u64,
}

#[contractevent]
pub struct DepositPlaced {
    #[topic]
    pub lottery_id: u64,
    #[topic]
    pub participant: Address,
    pub amount: i128,
    pub prize_pool: i128,
}

#[contractevent]
pub struct LotteryCancelled {
    #[topic]
    pub lottery_id: u64,
}

#[contractevent]
pub struct LotteryEnded {
    #[topic]
    pub lottery_id: u64,
    #[topic]
    pub winner: Address,
    pub payout: i128,
    pub fee: i128,
    pub draw_seed: BytesN<32>,
}

#[contractevent]
pub struct PayoutFailed {
    #[topic]
    pub lottery_id: u64,
    #[topic]
    pub winner: Address,
    pub payout: i128,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct LotteryContract;

#[contractimpl]
impl LotteryContract {
    /// Initialize the lottery platform.
    ///
    /// `token`: the asset all entry fees and payouts use.
    /// `treasury`: fixed destination for the platform fee.
    /// `fee_bps`: platform fee in basis points (e.g., 250 = 2.5%).
    pub fn init(
        env: Env,
        admin: Address,
        token: Address,
        treasury: Address,
        fee_bps: u32,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();

        if fee_bps > BASIS_POINTS_DIVISOR {
            return Err(Error::InvalidFeeBps);
        }

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Token, &token);
        env.storage().instance().set(&DataKey::Treasury, &treasury);
        env.storage().instance().set(&DataKey::FeeBps, &fee_bps);
        env.storage().instance().set(&DataKey::NextLotteryId, &1u64);
        Ok(())
    }

    /// Bind a display username to `user`, exactly once per address.
    ///
    /// Usernames are unique across the platform and immutable once set.
    /// Creates the profile record if the address has none yet.
    pub fn register_username(env: Env, user: Address, username: String) -> Result<(), Error> {
        require_initialized(&env)?;
        user.require_auth();

        if username.len() == 0 {
            return Err(Error::EmptyUsername);
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(Error::UsernameTooLong);
        }

        let mut profile = load_profile(&env, &user);
        if profile.username.len() > 0 {
            return Err(Error::AlreadyRegistered);
        }

        let owner_key = DataKey::UsernameOwner(username.clone());
        if env.storage().persistent().has(&owner_key) {
            return Err(Error::UsernameTaken);
        }

        profile.username = username.clone();
        set_persistent(&env, DataKey::Profile(user.clone()), &profile);
        set_persistent(&env, owner_key, &user);

        UsernameRegistered { user, username }.publish(&env);
        Ok(())
    }

    /// View a profile. Unknown addresses get a zero-valued profile with an
    /// empty username rather than an error, so clients can probe freely.
    pub fn get_user_profile(env: Env, user: Address) -> UserProfile {
        load_profile(&env, &user)
    }

    /// Open a new lottery. Admin only.
    ///
    /// `duration_secs` and `entry_fee` must both be strictly positive.
    /// Returns the new lottery's id; ids are sequential starting at 1.
    pub fn create_lottery(env: Env, duration_secs: u64, entry_fee: i128) -> Result<u64, Error> {
        require_initialized(&env)?;
        require_admin_auth(&env)?;

        if duration_secs == 0 || entry_fee <= 0 {
            return Err(Error::InvalidParameters);
        }

        let lottery_id: u64 = env
            .storage()
            .instance()
            .get(&DataKey::NextLotteryId)
            .unwrap();
        let next_id = lottery_id.checked_add(1).ok_or(Error::Overflow)?;
        env.storage().instance().set(&DataKey::NextLotteryId, &next_id);

        let end_time = env
            .ledger()
            .timestamp()
            .checked_add(duration_secs)
            .ok_or(Error::Overflow)?;

        let lottery = Lottery {
            id: lottery_id,
            entry_fee,
            end_time,
            prize_pool: 0,
            participants: Vec::new(&env),
            status: LotteryStatus::InProgress,
            winner: None,
            draw_seed: None,
        };
        set_persistent(&env, DataKey::Lottery(lottery_id), &lottery);

        LotteryCreated { lottery_id, entry_fee, end_time }.publish(&env);
        Ok(lottery_id)
    }

    /// View a lottery's full state.
    pub fn get_lottery_details(env: Env, lottery_id: u64) -> Result<Lottery, Error> {
        get_lottery(&env, lottery_id)
    }

    /// Number of lotteries ever created.
    pub fn get_lottery_count(env: Env) -> u64 {
        let next: u64 = env
            .storage()
            .instance()
            .get(&DataKey::NextLotteryId)
            .unwrap_or(1);
        next - 1
    }

    /// Enter a lottery by depositing exactly its entry fee.
    ///
    /// Checks run in a fixed order and the first failing one is reported:
    /// the lottery must exist, be open (`InProgress` and before its
    /// deadline), the amount must equal the entry fee, and the participant
    /// must not already hold an entry. On success the fee transfers into
    /// the contract and the participant's profile records the entry.
    pub fn deposit(
        env: Env,
        lottery_id: u64,
        participant: Address,
        amount: i128,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        participant.require_auth();

        let mut lot = get_lottery(&env, lottery_id)?;

        let now = env.ledger().timestamp();
        if lot.status != LotteryStatus::InProgress || now >= lot.end_time {
            return Err(Error::LotteryClosed);
        }
        if amount != lot.entry_fee {
            return Err(Error::WrongAmount);
        }

        let entry_key = DataKey::Entry(lottery_id, participant.clone());
        if env.storage().persistent().has(&entry_key) {
            return Err(Error::AlreadyParticipated);
        }

        // Take custody of the entry fee
        let token = get_token(&env);
        TokenClient::new(&env, &token).transfer(
            &participant,
            &env.current_contract_address(),
            &amount,
        );

        lot.participants.push_back(participant.clone());
        lot.prize_pool = lot.prize_pool.checked_add(amount).ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Lottery(lottery_id), &lot);
        set_persistent(&env, entry_key, &true);

        let mut profile = load_profile(&env, &participant);
        profile.participated.push_back(lottery_id);
        profile.total_participations = profile
            .total_participations
            .checked_add(1)
            .ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Profile(participant.clone()), &profile);

        DepositPlaced {
            lottery_id,
            participant,
            amount,
            prize_pool: lot.prize_pool,
        }
        .publish(&env);
        Ok(())
    }

    /// Close a lottery whose deadline has passed. Anyone can call this —
    /// the outcome is fully determined by ledger state.
    ///
    /// With zero entries the lottery is cancelled. Otherwise a winner is
    /// drawn, the pool net of the platform fee transfers to them, and the
    /// fee transfers to the treasury. The two transfers settle together or
    /// not at all: a blocked payout keeps the lottery `InProgress` with the
    /// drawn winner on record (reported via `PayoutFailed`), and a retry
    /// settles with that same winner instead of re-drawing.
    ///
    /// Returns the lottery's state after the call.
    pub fn finalize(env: Env, lottery_id: u64) -> Result<Lottery, Error> {
        require_initialized(&env)?;

        let mut lot = get_lottery(&env, lottery_id)?;
        if lot.status != LotteryStatus::InProgress {
            return Err(Error::AlreadyFinalized);
        }
        let now = env.ledger().timestamp();
        if now < lot.end_time {
            return Err(Error::NotYetEnded);
        }

        let count = lot.participants.len();
        if count == 0 {
            lot.status = LotteryStatus::Cancelled;
            set_persistent(&env, DataKey::Lottery(lottery_id), &lot);
            LotteryCancelled { lottery_id }.publish(&env);
            return Ok(lot);
        }

        // Reuse a winner recorded by an earlier payout-blocked attempt;
        // otherwise draw one from finalization-time ledger entropy.
        let (winner, draw_seed) = match (lot.winner.clone(), lot.draw_seed.clone()) {
            (Some(w), Some(s)) => (w, s),
            _ => {
                let seed = derive_draw_seed(&env, lottery_id, &lot.participants);
                let index = seed_to_index(&seed, count);
                (lot.participants.get_unchecked(index), seed)
            }
        };

        let fee = match calculate_fee(lot.prize_pool, get_fee_bps(&env)) {
            Ok(fee) => fee,
            Err(_) => return Err(Error::Overflow),
        };
        let payout = lot.prize_pool.checked_sub(fee).ok_or(Error::Overflow)?;

        let token = get_token(&env);
        let token_client = TokenClient::new(&env, &token);

        // Payout leg runs first as a fallible call. If the winner cannot
        // accept value, persist the draw and report it; the lottery stays
        // open for a retry that pays the same winner.
        if payout > 0 {
            let paid =
                token_client.try_transfer(&env.current_contract_address(), &winner, &payout);
            if !matches!(paid, Ok(Ok(()))) {
                lot.winner = Some(winner.clone());
                lot.draw_seed = Some(draw_seed);
                set_persistent(&env, DataKey::Lottery(lottery_id), &lot);
                PayoutFailed { lottery_id, winner, payout }.publish(&env);
                return Ok(lot);
            }
        }
        // Fee leg: a failure here aborts the whole invocation, unwinding
        // the payout leg with it, so partial settlement cannot persist.
        if fee > 0 {
            let treasury = get_treasury(&env);
            token_client.transfer(&env.current_contract_address(), &treasury, &fee);
        }

        lot.status = LotteryStatus::Ended;
        lot.winner = Some(winner.clone());
        lot.draw_seed = Some(draw_seed.clone());
        lot.prize_pool = payout;
        set_persistent(&env, DataKey::Lottery(lottery_id), &lot);

        let mut profile = load_profile(&env, &winner);
        profile.won.push_back(lottery_id);
        profile.total_winnings = profile
            .total_winnings
            .checked_add(payout)
            .ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Profile(winner.clone()), &profile);

        LotteryEnded { lottery_id, winner, payout, fee, draw_seed }.publish(&env);
        Ok(lot)
    }
}

// ---------------------------------------------------------------------------
// Winner draw
// ---------------------------------------------------------------------------

/// Seed for the winner draw: sha256 over the lottery id, the ledger
/// timestamp and sequence at finalization, and every participant in
/// deposit order. The ledger values are fixed only after the deposit
/// window closes, so no entrant can compute the index when depositing.
fn derive_draw_seed(env: &Env, lottery_id: u64, participants: &Vec<Address>) -> BytesN<32> {
    let mut preimage = Bytes::from_array(env, &lottery_id.to_be_bytes());
    preimage.append(&Bytes::from_array(env, &env.ledger().timestamp().to_be_bytes()));
    preimage.append(&Bytes::from_array(env, &env.ledger().sequence().to_be_bytes()));
    for participant in participants.iter() {
        preimage.append(&participant.to_string().to_bytes());
    }
    env.crypto().sha256(&preimage).into()
}

/// Winner index: first 8 seed bytes as a big-endian u64, mod `count`.
fn seed_to_index(seed: &BytesN<32>, count: u32) -> u32 {
    let arr = seed.to_array();
    let raw =
        u64::from_be_bytes([arr[0], arr[1], arr[2], arr[3], arr[4], arr[5], arr[6], arr[7]]);
    (raw % count as u64) as u32
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn require_initialized(env: &Env) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::Admin) {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

fn get_admin(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)
}

fn require_admin_auth(env: &Env) -> Result<(), Error> {
    let admin = get_admin(env)?;
    admin.require_auth();
    Ok(())
}

fn get_token(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Token)
        .expect("Lottery: token not set")
}

fn get_treasury(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Treasury)
        .expect("Lottery: treasury not set")
}

fn get_fee_bps(env: &Env) -> u32 {
    env.storage().instance().get(&DataKey::FeeBps).unwrap()
}

fn get_lottery(env: &Env, lottery_id: u64) -> Result<Lottery, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Lottery(lottery_id))
        .ok_or(Error::LotteryNotFound)
}

fn load_profile(env: &Env, user: &Address) -> UserProfile {
    env.storage()
        .persistent()
        .get(&DataKey::Profile(user.clone()))
        .unwrap_or_else(|| UserProfile {
            username: String::from_str(env, ""),
            participated: Vec::new(env),
            won: Vec::new(env),
            total_winnings: 0,
            total_participations: 0,
        })
}

fn set_persistent<T>(env: &Env, key: DataKey, value: &T)
where
    T: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
{
    env.storage().persistent().set(&key, value);
    extend_persistent_ttl(env, &key);
}

fn extend_persistent_ttl(env: &Env, key: &DataKey) {
    env.storage()
        .persistent()
        .extend_ttl(key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
