use std::collections::HashMap;
use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult, Script};
use tracing::{debug, warn};
use uuid::Uuid;

use async_trait::async_trait;
use marquee_core::error::BookingError;
use marquee_core::models::{
    Balance, EventRecord, QueueToken, Receipt, Reservation, ReservationStatus, Seat, SeatStatus,
    TokenStatus,
};
use marquee_core::store::{
    EnqueueOutcome, EnqueueRequest, HoldRequest, ReleaseOutcome, SettleOutcome, SettleRequest,
    TokenStore,
};

/// Expired token records linger briefly so a status poll can distinguish
/// "expired" from "never existed" before the key vanishes.
const EXPIRED_TOKEN_GRACE_SECS: i64 = 300;

const EVENTS_KEY: &str = "events";
const DUE_KEY: &str = "resv:due";

// Creates a WAITING token for (user, event) unless a live one exists, and
// activates it on the spot when nobody is waiting and capacity allows.
// Returns {created, token_id, status, issued_ms, activated_ms, expires_ms}.
const ENQUEUE_LUA: &str = r#"
    local existing = redis.call("GET", KEYS[1])
    if existing then
        local tkey = "token:" .. existing
        if redis.call("EXISTS", tkey) == 1 then
            local t = redis.call("HMGET", tkey, "status", "issued_at", "activated_at", "expires_at")
            if t[1] ~= "EXPIRED" then
                return {0, existing, t[1], tonumber(t[2]), tonumber(t[3]) or 0, tonumber(t[4]) or 0}
            end
        end
        redis.call("DEL", KEYS[1])
    end
    local now = tonumber(ARGV[4])
    redis.call("SADD", KEYS[4], ARGV[3])
    redis.call("HSET", KEYS[5], "user_id", ARGV[2], "event_id", ARGV[3], "issued_at", now)
    redis.call("SET", KEYS[1], ARGV[1])
    local waiting = redis.call("ZCARD", KEYS[2])
    local active = redis.call("ZCARD", KEYS[3])
    if waiting == 0 and active < tonumber(ARGV[5]) then
        local expires = now + tonumber(ARGV[6])
        redis.call("HSET", KEYS[5], "status", "ACTIVE", "activated_at", now, "expires_at", expires)
        redis.call("ZADD", KEYS[3], expires, ARGV[1])
        return {1, ARGV[1], "ACTIVE", now, now, expires}
    end
    local expires = now + tonumber(ARGV[7])
    redis.call("HSET", KEYS[5], "status", "WAITING", "expires_at", expires)
    redis.call("ZADD", KEYS[2], now, ARGV[1])
    return {1, ARGV[1], "WAITING", now, 0, expires}
"#;

// FIFO promotion: moves the oldest WAITING tokens into the ACTIVE set until
// capacity is reached. Active zset scores are expiry timestamps.
const PROMOTE_LUA: &str = r#"
    local slots = tonumber(ARGV[2]) - redis.call("ZCARD", KEYS[2])
    if slots <= 0 then return {} end
    local ids = redis.call("ZRANGE", KEYS[1], 0, slots - 1)
    local now = tonumber(ARGV[1])
    local expires = now + tonumber(ARGV[3])
    for _, id in ipairs(ids) do
        redis.call("ZREM", KEYS[1], id)
        redis.call("ZADD", KEYS[2], expires, id)
        redis.call("HSET", "token:" .. id, "status", "ACTIVE", "activated_at", now, "expires_at", expires)
    end
    return ids
"#;

// Sweeps one event's ACTIVE set for tokens whose TTL elapsed.
const EXPIRE_ACTIVE_LUA: &str = r#"
    local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", "(" .. ARGV[1])
    for _, id in ipairs(ids) do
        redis.call("ZREM", KEYS[1], id)
        local tkey = "token:" .. id
        local user = redis.call("HGET", tkey, "user_id")
        if user then
            local mkey = "queue:" .. ARGV[3] .. ":user:" .. user
            if redis.call("GET", mkey) == id then
                redis.call("DEL", mkey)
            end
        end
        redis.call("HSET", tkey, "status", "EXPIRED")
        redis.call("EXPIRE", tkey, ARGV[2])
    end
    return #ids
"#;

// Same sweep for WAITING tokens; the zset is scored by issue time, so the
// cutoff is now minus the waiting TTL, computed by the caller.
const EXPIRE_WAITING_LUA: &str = r#"
    local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", "(" .. ARGV[1])
    for _, id in ipairs(ids) do
        redis.call("ZREM", KEYS[1], id)
        local tkey = "token:" .. id
        local user = redis.call("HGET", tkey, "user_id")
        if user then
            local mkey = "queue:" .. ARGV[3] .. ":user:" .. user
            if redis.call("GET", mkey) == id then
                redis.call("DEL", mkey)
            end
        end
        redis.call("HSET", tkey, "status", "EXPIRED")
        redis.call("EXPIRE", tkey, ARGV[2])
    end
    return #ids
"#;

// The double-booking gate: admission check plus seat compare-and-set plus
// reservation write, one script so no interleaving can split them.
// Codes: 0 held, 1 token missing, 2 not admitted, 3 token expired,
// 4 seat missing, 5 seat taken.
const HOLD_LUA: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then return {1} end
    local t = redis.call("HMGET", KEYS[1], "status", "expires_at", "user_id", "event_id")
    if t[3] ~= ARGV[2] or t[4] ~= ARGV[3] then return {2} end
    if t[1] == "EXPIRED" or tonumber(t[2]) <= tonumber(ARGV[6]) then return {3} end
    if t[1] ~= "ACTIVE" then return {2} end
    if redis.call("EXISTS", KEYS[2]) == 0 then return {4} end
    if redis.call("HGET", KEYS[2], "status") ~= "AVAILABLE" then return {5} end
    local expires = tonumber(ARGV[6]) + tonumber(ARGV[7])
    redis.call("HSET", KEYS[2], "status", "HELD", "reservation_id", ARGV[5])
    redis.call("HSET", KEYS[3], "user_id", ARGV[2], "event_id", ARGV[3], "seat_number", ARGV[4],
        "token_id", ARGV[1], "status", "HOLDING", "held_at", ARGV[6], "hold_expires_at", expires)
    redis.call("ZADD", KEYS[4], expires, ARGV[5])
    return {0, expires}
"#;

// HOLDING -> target plus seat free. No-op when the reservation already
// reached a terminal state, so redundant reaper passes are safe.
// Codes: 0 released, 1 |not found, 2 already terminal.
const RELEASE_LUA: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then return {1} end
    local r = redis.call("HMGET", KEYS[1], "status", "user_id", "event_id", "seat_number",
        "token_id", "held_at", "hold_expires_at")
    if r[1] ~= "HOLDING" then return {2, r[1]} end
    local skey = "seat:" .. r[3] .. ":" .. r[4]
    if redis.call("HGET", skey, "reservation_id") == ARGV[1] then
        redis.call("HSET", skey, "status", "AVAILABLE")
        redis.call("HDEL", skey, "reservation_id")
    end
    redis.call("HSET", KEYS[1], "status", ARGV[2])
    redis.call("ZREM", KEYS[2], ARGV[1])
    return {0, r[2], r[3], r[4], r[5], r[6], r[7]}
"#;

// Settlement: hold re-validation, version-checked debit, seat SOLD,
// reservation CONFIRMED, receipt write and token destruction in one unit.
// Codes: 0 settled, 1 not found, 2 not holding, 3 hold lapsed,
// 4 wrong user, 5 already settled (returns stored receipt),
// 6 version conflict, 7 insufficient funds.
const SETTLE_LUA: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then return {1} end
    local r = redis.call("HMGET", KEYS[1], "status", "user_id", "hold_expires_at",
        "event_id", "seat_number", "token_id")
    if r[2] ~= ARGV[2] then return {4} end
    if r[1] == "CONFIRMED" then
        local rc = redis.call("HMGET", KEYS[3], "receipt_id", "amount", "balance_after", "settled_at")
        return {5, rc[1], rc[2], rc[3], rc[4]}
    end
    if r[1] ~= "HOLDING" then return {2, r[1]} end
    if tonumber(r[3]) <= tonumber(ARGV[6]) then return {3} end
    local version = tonumber(redis.call("HGET", KEYS[2], "version") or "0")
    if version ~= tonumber(ARGV[4]) then return {6, version} end
    local amount = tonumber(redis.call("HGET", KEYS[2], "amount") or "0")
    local debit = tonumber(ARGV[3])
    if amount < debit then return {7, amount} end
    local after = amount - debit
    redis.call("HSET", KEYS[2], "amount", after, "version", version + 1)
    redis.call("HSET", "seat:" .. r[4] .. ":" .. r[5], "status", "SOLD")
    redis.call("HSET", KEYS[1], "status", "CONFIRMED")
    redis.call("ZREM", KEYS[4], ARGV[1])
    redis.call("HSET", KEYS[3], "receipt_id", ARGV[5], "user_id", ARGV[2], "amount", debit,
        "balance_after", after, "settled_at", ARGV[6])
    redis.call("DEL", KEYS[5])
    redis.call("ZREM", KEYS[6], r[6])
    local mkey = "queue:" .. ARGV[7] .. ":user:" .. ARGV[2]
    if redis.call("GET", mkey) == r[6] then
        redis.call("DEL", mkey)
    end
    return {0, after}
"#;

// Atomic credit; creates the balance hash on first charge.
const CHARGE_LUA: &str = r#"
    local amount = tonumber(redis.call("HGET", KEYS[1], "amount") or "0")
    local version = tonumber(redis.call("HGET", KEYS[1], "version") or "0")
    local after = amount + tonumber(ARGV[1])
    redis.call("HSET", KEYS[1], "amount", after, "version", version + 1)
    return {after, version + 1}
"#;

/// Redis-backed implementation of the atomic store. Every multi-key state
/// transition is a single Lua script, so exclusivity holds across any
/// number of service instances.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    op_timeout: StdDuration,
    enqueue_script: Script,
    promote_script: Script,
    expire_active_script: Script,
    expire_waiting_script: Script,
    hold_script: Script,
    release_script: Script,
    settle_script: Script,
    charge_script: Script,
}

fn token_key(token_id: Uuid) -> String {
    format!("token:{}", token_id)
}

fn user_key(event_id: Uuid, user_id: &str) -> String {
    format!("queue:{}:user:{}", event_id, user_id)
}

fn waiting_key(event_id: Uuid) -> String {
    format!("queue:{}:waiting", event_id)
}

fn active_key(event_id: Uuid) -> String {
    format!("queue:{}:active", event_id)
}

fn event_key(event_id: Uuid) -> String {
    format!("event:{}", event_id)
}

fn seat_key(event_id: Uuid, seat_number: u32) -> String {
    format!("seat:{}:{}", event_id, seat_number)
}

fn resv_key(reservation_id: Uuid) -> String {
    format!("resv:{}", reservation_id)
}

fn balance_key(user_id: &str) -> String {
    format!("balance:{}", user_id)
}

fn receipt_key(reservation_id: Uuid) -> String {
    format!("receipt:{}", reservation_id)
}

fn corrupt(what: &str) -> BookingError {
    BookingError::StoreUnavailable(format!("corrupt record: {}", what))
}

fn dt(ms: i64) -> Result<DateTime<Utc>, BookingError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| corrupt("timestamp"))
}

fn val_str(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(data) => String::from_utf8(data.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn val_i64(value: &redis::Value) -> Option<i64> {
    match value {
        redis::Value::Int(n) => Some(*n),
        redis::Value::BulkString(data) => std::str::from_utf8(data).ok()?.parse().ok(),
        _ => None,
    }
}

fn map_str<'a>(
    map: &'a HashMap<String, String>,
    field: &str,
) -> Result<&'a str, BookingError> {
    map.get(field)
        .map(String::as_str)
        .ok_or_else(|| corrupt(field))
}

fn map_i64(map: &HashMap<String, String>, field: &str) -> Result<i64, BookingError> {
    map_str(map, field)?.parse().map_err(|_| corrupt(field))
}

fn map_dt(map: &HashMap<String, String>, field: &str) -> Result<DateTime<Utc>, BookingError> {
    dt(map_i64(map, field)?)
}

fn map_uuid(map: &HashMap<String, String>, field: &str) -> Result<Uuid, BookingError> {
    map_str(map, field)?.parse().map_err(|_| corrupt(field))
}

fn token_from_map(
    token_id: Uuid,
    map: &HashMap<String, String>,
) -> Result<QueueToken, BookingError> {
    let status = TokenStatus::parse(map_str(map, "status")?).ok_or_else(|| corrupt("status"))?;
    let activated_at = match map.get("activated_at") {
        Some(raw) => Some(dt(raw.parse().map_err(|_| corrupt("activated_at"))?)?),
        None => None,
    };
    Ok(QueueToken {
        token_id,
        user_id: map_str(map, "user_id")?.to_string(),
        event_id: map_uuid(map, "event_id")?,
        status,
        issued_at: map_dt(map, "issued_at")?,
        activated_at,
        expires_at: map_dt(map, "expires_at")?,
    })
}

fn reservation_from_map(
    reservation_id: Uuid,
    map: &HashMap<String, String>,
) -> Result<Reservation, BookingError> {
    let status =
        ReservationStatus::parse(map_str(map, "status")?).ok_or_else(|| corrupt("status"))?;
    Ok(Reservation {
        reservation_id,
        user_id: map_str(map, "user_id")?.to_string(),
        event_id: map_uuid(map, "event_id")?,
        seat_number: map_i64(map, "seat_number")? as u32,
        queue_token_id: map_uuid(map, "token_id")?,
        status,
        held_at: map_dt(map, "held_at")?,
        hold_expires_at: map_dt(map, "hold_expires_at")?,
    })
}

impl RedisStore {
    pub async fn connect(url: &str, op_timeout: StdDuration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            op_timeout,
            enqueue_script: Script::new(ENQUEUE_LUA),
            promote_script: Script::new(PROMOTE_LUA),
            expire_active_script: Script::new(EXPIRE_ACTIVE_LUA),
            expire_waiting_script: Script::new(EXPIRE_WAITING_LUA),
            hold_script: Script::new(HOLD_LUA),
            release_script: Script::new(RELEASE_LUA),
            settle_script: Script::new(SETTLE_LUA),
            charge_script: Script::new(CHARGE_LUA),
        })
    }

    /// Bound every store call: a hung primitive surfaces as StoreUnavailable
    /// instead of blocking the caller indefinitely.
    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RedisResult<T>> + Send,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(op, error = %err, "redis operation failed");
                Err(BookingError::StoreUnavailable(format!("{}: {}", op, err)))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.op_timeout.as_millis() as u64, "redis operation timed out");
                Err(BookingError::StoreUnavailable(format!("{}: timed out", op)))
            }
        }
    }

    async fn hash(&self, op: &'static str, key: String) -> Result<HashMap<String, String>, BookingError> {
        let mut conn = self.conn.clone();
        self.run(op, async move { conn.hgetall(key).await }).await
    }
}

#[async_trait]
impl TokenStore for RedisStore {
    async fn enqueue_token(&self, req: EnqueueRequest) -> Result<EnqueueOutcome, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.enqueue_script;
        let now_ms = req.now.timestamp_millis();
        let user_id = req.user_id.clone();
        let reply: (i64, String, String, i64, i64, i64) = self
            .run("enqueue_token", async move {
                script
                    .key(user_key(req.event_id, &req.user_id))
                    .key(waiting_key(req.event_id))
                    .key(active_key(req.event_id))
                    .key(EVENTS_KEY)
                    .key(token_key(req.token_id))
                    .arg(req.token_id.to_string())
                    .arg(&req.user_id)
                    .arg(req.event_id.to_string())
                    .arg(now_ms)
                    .arg(req.capacity)
                    .arg(req.active_ttl.num_milliseconds())
                    .arg(req.waiting_ttl.num_milliseconds())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let (created, id_raw, status_raw, issued_ms, activated_ms, expires_ms) = reply;
        let token_id: Uuid = id_raw.parse().map_err(|_| corrupt("token_id"))?;
        let status = TokenStatus::parse(&status_raw).ok_or_else(|| corrupt("status"))?;
        let token = QueueToken {
            token_id,
            user_id,
            event_id: req.event_id,
            status,
            issued_at: dt(issued_ms)?,
            activated_at: if activated_ms > 0 {
                Some(dt(activated_ms)?)
            } else {
                None
            },
            expires_at: dt(expires_ms)?,
        };
        Ok(EnqueueOutcome {
            token,
            created: created == 1,
        })
    }

    async fn get_token(&self, token_id: Uuid) -> Result<Option<QueueToken>, BookingError> {
        let map = self.hash("get_token", token_key(token_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(token_from_map(token_id, &map)?))
    }

    async fn active_count(&self, event_id: Uuid) -> Result<u64, BookingError> {
        let mut conn = self.conn.clone();
        self.run("active_count", async move {
            conn.zcard(active_key(event_id)).await
        })
        .await
    }

    async fn waiting_rank(
        &self,
        event_id: Uuid,
        token_id: Uuid,
    ) -> Result<Option<u64>, BookingError> {
        let mut conn = self.conn.clone();
        self.run("waiting_rank", async move {
            conn.zrank(waiting_key(event_id), token_id.to_string()).await
        })
        .await
    }

    async fn promote_waiting(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        capacity: u32,
        active_ttl: Duration,
    ) -> Result<Vec<Uuid>, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.promote_script;
        let ids: Vec<String> = self
            .run("promote_waiting", async move {
                script
                    .key(waiting_key(event_id))
                    .key(active_key(event_id))
                    .arg(now.timestamp_millis())
                    .arg(capacity)
                    .arg(active_ttl.num_milliseconds())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        ids.iter()
            .map(|raw| raw.parse().map_err(|_| corrupt("token_id")))
            .collect()
    }

    async fn expire_active_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.expire_active_script;
        self.run("expire_active_tokens", async move {
            script
                .key(active_key(event_id))
                .arg(now.timestamp_millis())
                .arg(EXPIRED_TOKEN_GRACE_SECS)
                .arg(event_id.to_string())
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn expire_waiting_tokens(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
        waiting_ttl: Duration,
    ) -> Result<u64, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.expire_waiting_script;
        let cutoff_ms = (now - waiting_ttl).timestamp_millis();
        self.run("expire_waiting_tokens", async move {
            script
                .key(waiting_key(event_id))
                .arg(cutoff_ms)
                .arg(EXPIRED_TOKEN_GRACE_SECS)
                .arg(event_id.to_string())
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn list_event_ids(&self) -> Result<Vec<Uuid>, BookingError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = self
            .run("list_event_ids", async move { conn.smembers(EVENTS_KEY).await })
            .await?;
        Ok(raw
            .iter()
            .filter_map(|value| match value.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(value, "skipping malformed event id in registry");
                    None
                }
            })
            .collect())
    }

    async fn create_event(&self, event: &EventRecord) -> Result<(), BookingError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(
            event_key(event.event_id),
            &[
                ("name", event.name.clone()),
                ("seat_count", event.seat_count.to_string()),
                ("price", event.price.to_string()),
                ("created_at", event.created_at.timestamp_millis().to_string()),
            ],
        )
        .ignore();
        pipe.sadd(EVENTS_KEY, event.event_id.to_string()).ignore();
        for seat_number in 1..=event.seat_count {
            pipe.hset(seat_key(event.event_id, seat_number), "status", "AVAILABLE")
                .ignore();
        }
        self.run("create_event", async move {
            pipe.query_async::<()>(&mut conn).await
        })
        .await?;
        debug!(event_id = %event.event_id, seats = event.seat_count, "event seeded");
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRecord>, BookingError> {
        let map = self.hash("get_event", event_key(event_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(EventRecord {
            event_id,
            name: map_str(&map, "name")?.to_string(),
            seat_count: map_i64(&map, "seat_count")? as u32,
            price: map_i64(&map, "price")?,
            created_at: map_dt(&map, "created_at")?,
        }))
    }

    async fn list_seats(&self, event_id: Uuid) -> Result<Vec<Seat>, BookingError> {
        let Some(event) = self.get_event(event_id).await? else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for seat_number in 1..=event.seat_count {
            pipe.hgetall(seat_key(event_id, seat_number));
        }
        let maps: Vec<HashMap<String, String>> = self
            .run("list_seats", async move { pipe.query_async(&mut conn).await })
            .await?;

        let mut seats = Vec::with_capacity(maps.len());
        for (index, map) in maps.iter().enumerate() {
            let seat_number = index as u32 + 1;
            if map.is_empty() {
                continue;
            }
            let status =
                SeatStatus::parse(map_str(map, "status")?).ok_or_else(|| corrupt("status"))?;
            let reservation_id = match map.get("reservation_id") {
                Some(raw) => Some(raw.parse().map_err(|_| corrupt("reservation_id"))?),
                None => None,
            };
            seats.push(Seat {
                event_id,
                seat_number,
                status,
                reservation_id,
                price: event.price,
            });
        }
        Ok(seats)
    }

    async fn hold_seat(&self, req: HoldRequest) -> Result<Reservation, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.hold_script;
        let now_ms = req.now.timestamp_millis();
        let user_id = req.user_id.clone();
        let reply: Vec<i64> = self
            .run("hold_seat", async move {
                script
                    .key(token_key(req.token_id))
                    .key(seat_key(req.event_id, req.seat_number))
                    .key(resv_key(req.reservation_id))
                    .key(DUE_KEY)
                    .arg(req.token_id.to_string())
                    .arg(&req.user_id)
                    .arg(req.event_id.to_string())
                    .arg(req.seat_number)
                    .arg(req.reservation_id.to_string())
                    .arg(now_ms)
                    .arg(req.hold_ttl.num_milliseconds())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        match reply.first().copied() {
            Some(0) => {
                let expires_ms = reply.get(1).copied().ok_or_else(|| corrupt("hold reply"))?;
                debug!(
                    reservation_id = %req.reservation_id,
                    event_id = %req.event_id,
                    seat = req.seat_number,
                    "seat hold acquired"
                );
                Ok(Reservation {
                    reservation_id: req.reservation_id,
                    user_id,
                    event_id: req.event_id,
                    seat_number: req.seat_number,
                    queue_token_id: req.token_id,
                    status: ReservationStatus::Holding,
                    held_at: dt(now_ms)?,
                    hold_expires_at: dt(expires_ms)?,
                })
            }
            Some(1) => Err(BookingError::TokenNotFound(req.token_id)),
            Some(2) => Err(BookingError::AdmissionRequired),
            Some(3) => Err(BookingError::TokenExpired(req.token_id)),
            Some(4) => Err(BookingError::SeatNotFound {
                event_id: req.event_id,
                seat_number: req.seat_number,
            }),
            Some(5) => Err(BookingError::SeatUnavailable {
                event_id: req.event_id,
                seat_number: req.seat_number,
            }),
            _ => Err(corrupt("hold reply")),
        }
    }

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, BookingError> {
        let map = self.hash("get_reservation", resv_key(reservation_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(reservation_from_map(reservation_id, &map)?))
    }

    async fn release_hold(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        _now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, BookingError> {
        if !target.is_terminal() || target == ReservationStatus::Confirmed {
            return Err(BookingError::InvalidReservationState {
                from: ReservationStatus::Holding.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let mut conn = self.conn.clone();
        let script = &self.release_script;
        let reply: Vec<redis::Value> = self
            .run("release_hold", async move {
                script
                    .key(resv_key(reservation_id))
                    .key(DUE_KEY)
                    .arg(reservation_id.to_string())
                    .arg(target.as_str())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let code = reply
            .first()
            .and_then(val_i64)
            .ok_or_else(|| corrupt("release reply"))?;
        match code {
            0 => {
                let field = |index: usize| -> Result<String, BookingError> {
                    reply
                        .get(index)
                        .and_then(val_str)
                        .ok_or_else(|| corrupt("release reply"))
                };
                let reservation = Reservation {
                    reservation_id,
                    user_id: field(1)?,
                    event_id: field(2)?.parse().map_err(|_| corrupt("event_id"))?,
                    seat_number: field(3)?.parse().map_err(|_| corrupt("seat_number"))?,
                    queue_token_id: field(4)?.parse().map_err(|_| corrupt("token_id"))?,
                    status: target,
                    held_at: dt(field(5)?.parse().map_err(|_| corrupt("held_at"))?)?,
                    hold_expires_at: dt(field(6)?
                        .parse()
                        .map_err(|_| corrupt("hold_expires_at"))?)?,
                };
                debug!(reservation_id = %reservation_id, target = target.as_str(), "hold released");
                Ok(ReleaseOutcome::Released(reservation))
            }
            1 => Ok(ReleaseOutcome::NotFound),
            2 => {
                let status_raw = reply
                    .get(1)
                    .and_then(val_str)
                    .ok_or_else(|| corrupt("release reply"))?;
                let status = ReservationStatus::parse(&status_raw)
                    .ok_or_else(|| corrupt("status"))?;
                Ok(ReleaseOutcome::AlreadyTerminal(status))
            }
            _ => Err(corrupt("release reply")),
        }
    }

    async fn due_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, BookingError> {
        let mut conn = self.conn.clone();
        let cutoff = format!("({}", now.timestamp_millis());
        let raw: Vec<String> = self
            .run("due_holds", async move {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(DUE_KEY)
                    .arg("-inf")
                    .arg(cutoff)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(limit)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(raw
            .iter()
            .filter_map(|value| match value.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(value, "skipping malformed reservation id in due set");
                    None
                }
            })
            .collect())
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>, BookingError> {
        let map = self.hash("get_balance", balance_key(user_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Balance {
            user_id: user_id.to_string(),
            amount: map_i64(&map, "amount")?,
            version: map_i64(&map, "version")? as u64,
        }))
    }

    async fn charge_balance(&self, user_id: &str, amount: i64) -> Result<Balance, BookingError> {
        let mut conn = self.conn.clone();
        let script = &self.charge_script;
        let key = balance_key(user_id);
        let (after, version): (i64, u64) = self
            .run("charge_balance", async move {
                script.key(key).arg(amount).invoke_async(&mut conn).await
            })
            .await?;
        Ok(Balance {
            user_id: user_id.to_string(),
            amount: after,
            version,
        })
    }

    async fn get_receipt(&self, reservation_id: Uuid) -> Result<Option<Receipt>, BookingError> {
        let map = self.hash("get_receipt", receipt_key(reservation_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Receipt {
            receipt_id: map_uuid(&map, "receipt_id")?,
            reservation_id,
            user_id: map_str(&map, "user_id")?.to_string(),
            amount: map_i64(&map, "amount")?,
            balance_after: map_i64(&map, "balance_after")?,
            settled_at: map_dt(&map, "settled_at")?,
        }))
    }

    async fn settle_payment(&self, req: SettleRequest) -> Result<SettleOutcome, BookingError> {
        // Non-atomic pre-read to learn the token and event keys; the script
        // re-validates everything inside the atomic unit.
        let Some(resv) = self.get_reservation(req.reservation_id).await? else {
            return Ok(SettleOutcome::NotFound);
        };

        let mut conn = self.conn.clone();
        let script = &self.settle_script;
        let now_ms = req.now.timestamp_millis();
        let user_id = req.user_id.clone();
        let reply: Vec<redis::Value> = self
            .run("settle_payment", async move {
                script
                    .key(resv_key(req.reservation_id))
                    .key(balance_key(&req.user_id))
                    .key(receipt_key(req.reservation_id))
                    .key(DUE_KEY)
                    .key(token_key(resv.queue_token_id))
                    .key(active_key(resv.event_id))
                    .arg(req.reservation_id.to_string())
                    .arg(&req.user_id)
                    .arg(req.amount)
                    .arg(req.expected_version)
                    .arg(req.receipt_id.to_string())
                    .arg(now_ms)
                    .arg(resv.event_id.to_string())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let code = reply
            .first()
            .and_then(val_i64)
            .ok_or_else(|| corrupt("settle reply"))?;
        match code {
            0 => {
                let after = reply
                    .get(1)
                    .and_then(val_i64)
                    .ok_or_else(|| corrupt("settle reply"))?;
                Ok(SettleOutcome::Settled(Receipt {
                    receipt_id: req.receipt_id,
                    reservation_id: req.reservation_id,
                    user_id,
                    amount: req.amount,
                    balance_after: after,
                    settled_at: dt(now_ms)?,
                }))
            }
            1 => Ok(SettleOutcome::NotFound),
            2 => {
                let status_raw = reply
                    .get(1)
                    .and_then(val_str)
                    .ok_or_else(|| corrupt("settle reply"))?;
                let status = ReservationStatus::parse(&status_raw)
                    .ok_or_else(|| corrupt("status"))?;
                Ok(SettleOutcome::NotHolding { status })
            }
            3 => Ok(SettleOutcome::HoldLapsed),
            4 => Ok(SettleOutcome::WrongUser),
            5 => {
                let field = |index: usize| {
                    reply
                        .get(index)
                        .ok_or_else(|| corrupt("settle reply"))
                };
                Ok(SettleOutcome::AlreadySettled(Receipt {
                    receipt_id: val_str(field(1)?)
                        .and_then(|raw| raw.parse().ok())
                        .ok_or_else(|| corrupt("receipt_id"))?,
                    reservation_id: req.reservation_id,
                    user_id,
                    amount: val_i64(field(2)?).ok_or_else(|| corrupt("amount"))?,
                    balance_after: val_i64(field(3)?).ok_or_else(|| corrupt("balance_after"))?,
                    settled_at: dt(val_i64(field(4)?).ok_or_else(|| corrupt("settled_at"))?)?,
                }))
            }
            6 => {
                let current = reply
                    .get(1)
                    .and_then(val_i64)
                    .ok_or_else(|| corrupt("settle reply"))?;
                Ok(SettleOutcome::VersionConflict {
                    current: current as u64,
                })
            }
            7 => {
                let available = reply
                    .get(1)
                    .and_then(val_i64)
                    .ok_or_else(|| corrupt("settle reply"))?;
                Ok(SettleOutcome::InsufficientFunds { available })
            }
            _ => Err(corrupt("settle reply")),
        }
    }
}
