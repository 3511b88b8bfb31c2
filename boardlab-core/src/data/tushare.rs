//! Tushare Pro client.
//!
//! Every Tushare API is a POST of `{api_name, token, params, fields}` to one
//! endpoint, answered with `{code, msg, data: {fields, items}}` where `items` is
//! a row-major table. Rows are decoded by field name, so column order changes
//! on the vendor side do not break parsing.
//!
//! Requests go through the shared [`RequestThrottle`]: per-minute budget,
//! exponential backoff on transient failures, and a hard stop once the vendor
//! rejects the token.

use super::provider::{DataError, MarketFeed};
use super::throttle::RequestThrottle;
use crate::domain::SecurityInfo;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://api.tushare.pro";

/// Vendor code for an invalid or expired token.
const CODE_BAD_TOKEN: i64 = 40101;
/// Vendor code for "too many requests this minute".
const CODE_RATE_LIMITED: i64 = 40203;

const DAILY_FIELDS: &[&str] = &[
    "ts_code", "trade_date", "open", "high", "low", "close", "pre_close", "change", "pct_chg", "vol", "amount",
];
const LIMIT_FIELDS: &[&str] = &["ts_code", "trade_date", "pre_close", "up_limit", "down_limit"];
const BASIC_FIELDS: &[&str] = &[
    "ts_code", "symbol", "name", "area", "industry", "market", "exchange", "list_date",
];

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: &'a BTreeMap<&'a str, String>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<ApiTable>,
}

/// Row-major table as returned by the vendor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTable {
    pub fields: Vec<String>,
    #[serde(default)]
    pub items: Vec<Vec<Value>>,
}

impl ApiTable {
    fn index(&self) -> HashMap<&str, usize> {
        self.fields.iter().enumerate().map(|(i, f)| (f.as_str(), i)).collect()
    }

    fn require(&self, names: &[&str]) -> Result<(), DataError> {
        let index = self.index();
        match names.iter().find(|n| !index.contains_key(**n)) {
            Some(missing) => Err(DataError::ResponseFormatChanged(format!("field '{missing}' missing"))),
            None => Ok(()),
        }
    }

    fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        let index = Arc::new(self.index());
        self.items.iter().map(move |cells| Row {
            index: Arc::clone(&index),
            cells,
        })
    }
}

struct Row<'a> {
    index: Arc<HashMap<&'a str, usize>>,
    cells: &'a [Value],
}

impl Row<'_> {
    fn cell(&self, name: &str) -> Option<&Value> {
        self.index.get(name).and_then(|i| self.cells.get(*i))
    }

    fn str(&self, name: &str) -> Option<String> {
        match self.cell(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn f64(&self, name: &str) -> Option<f64> {
        match self.cell(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn date(&self, name: &str) -> Option<NaiveDate> {
        self.str(name).and_then(|s| parse_vendor_date(&s))
    }
}

pub fn parse_vendor_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

pub fn vendor_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// One `trade_cal` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarRow {
    pub cal_date: NaiveDate,
    pub is_open: bool,
}

/// One `daily` row. Volume in lots, amount in thousands of CNY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub pre_close: f64,
    pub pct_chg: Option<f64>,
    pub vol: f64,
    pub amount: f64,
}

/// One `stk_limit` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRow {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub pre_close: Option<f64>,
    pub up_limit: Option<f64>,
    pub down_limit: Option<f64>,
}

pub fn parse_calendar(table: &ApiTable) -> Result<Vec<CalendarRow>, DataError> {
    table.require(&["cal_date", "is_open"])?;
    table
        .rows()
        .map(|row| {
            let cal_date = row
                .date("cal_date")
                .ok_or_else(|| DataError::ResponseFormatChanged("bad cal_date".into()))?;
            let is_open = row.f64("is_open").map(|v| v > 0.5).unwrap_or(false);
            Ok(CalendarRow { cal_date, is_open })
        })
        .collect()
}

/// Rows without a code, date or close are dropped with a warning.
pub fn parse_quotes(table: &ApiTable) -> Result<Vec<QuoteRow>, DataError> {
    table.require(&["ts_code", "trade_date", "close"])?;
    let mut out = Vec::with_capacity(table.items.len());
    for row in table.rows() {
        let (Some(ts_code), Some(trade_date), Some(close)) =
            (row.str("ts_code"), row.date("trade_date"), row.f64("close"))
        else {
            warn!(row = ?row.cells, "dropping malformed daily row");
            continue;
        };
        out.push(QuoteRow {
            ts_code,
            trade_date,
            open: row.f64("open").unwrap_or(f64::NAN),
            high: row.f64("high").unwrap_or(f64::NAN),
            low: row.f64("low").unwrap_or(f64::NAN),
            close,
            pre_close: row.f64("pre_close").unwrap_or(f64::NAN),
            pct_chg: row.f64("pct_chg"),
            vol: row.f64("vol").unwrap_or(0.0),
            amount: row.f64("amount").unwrap_or(0.0),
        });
    }
    Ok(out)
}

pub fn parse_limits(table: &ApiTable) -> Result<Vec<LimitRow>, DataError> {
    table.require(&["ts_code", "trade_date", "up_limit", "down_limit"])?;
    let mut out = Vec::with_capacity(table.items.len());
    for row in table.rows() {
        let (Some(ts_code), Some(trade_date)) = (row.str("ts_code"), row.date("trade_date")) else {
            warn!(row = ?row.cells, "dropping malformed stk_limit row");
            continue;
        };
        out.push(LimitRow {
            ts_code,
            trade_date,
            pre_close: row.f64("pre_close"),
            up_limit: row.f64("up_limit"),
            down_limit: row.f64("down_limit"),
        });
    }
    Ok(out)
}

pub fn parse_securities(table: &ApiTable) -> Result<Vec<SecurityInfo>, DataError> {
    table.require(&["ts_code", "name"])?;
    Ok(table
        .rows()
        .filter_map(|row| {
            let ts_code = row.str("ts_code")?;
            Some(SecurityInfo {
                symbol: row
                    .str("symbol")
                    .unwrap_or_else(|| ts_code.split('.').next().unwrap_or_default().to_string()),
                ts_code,
                name: row.str("name").unwrap_or_default(),
                area: row.str("area"),
                industry: row.str("industry"),
                market: row.str("market"),
                exchange: row.str("exchange"),
                list_date: row.date("list_date"),
            })
        })
        .collect())
}

/// Connection settings for [`TushareClient`].
#[derive(Debug, Clone)]
pub struct TushareSettings {
    pub base_url: String,
    pub token: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl TushareSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Blocking Tushare Pro client.
pub struct TushareClient {
    client: reqwest::blocking::Client,
    settings: TushareSettings,
    throttle: Arc<RequestThrottle>,
}

impl TushareClient {
    pub fn new(settings: TushareSettings, throttle: Arc<RequestThrottle>) -> Result<Self, DataError> {
        if settings.token.trim().is_empty() {
            return Err(DataError::AuthenticationFailed("empty token".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            throttle,
        })
    }

    pub fn is_available(&self) -> bool {
        self.throttle.is_allowed()
    }

    /// Call one API with retry, backoff and the hard stop.
    pub fn call(
        &self,
        api_name: &str,
        params: &BTreeMap<&str, String>,
        fields: &[&str],
    ) -> Result<ApiTable, DataError> {
        let request = ApiRequest {
            api_name,
            token: &self.settings.token,
            params,
            fields: fields.join(","),
        };
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if !self.throttle.is_allowed() {
                return Err(DataError::HardStop);
            }
            if attempt > 0 {
                let delay = self.throttle.backoff(attempt);
                debug!(api_name, attempt, ?delay, "retrying vendor request");
                std::thread::sleep(delay);
            }
            self.throttle.acquire();

            let resp = match self.client.post(&self.settings.base_url).json(&request).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.throttle.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                self.throttle.halt();
                return Err(DataError::AuthenticationFailed(format!("HTTP {status}")));
            }
            if !status.is_success() {
                self.throttle.record_failure();
                last_error = Some(DataError::Other(format!("HTTP {status} for {api_name}")));
                continue;
            }

            let body: ApiResponse = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse {api_name} response: {e}"))
            })?;

            match interpret(api_name, body) {
                Ok(table) => {
                    self.throttle.record_success();
                    return Ok(table);
                }
                Err(DataError::AuthenticationFailed(msg)) => {
                    self.throttle.halt();
                    return Err(DataError::AuthenticationFailed(msg));
                }
                Err(e @ DataError::RateLimited(_)) => {
                    self.throttle.record_failure();
                    warn!(api_name, error = %e, "vendor rate limit hit");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    pub fn trade_cal(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarRow>, DataError> {
        let mut params = BTreeMap::new();
        params.insert("exchange", "SSE".to_string());
        params.insert("start_date", vendor_date(start));
        params.insert("end_date", vendor_date(end));
        let table = self.call("trade_cal", &params, &["exchange", "cal_date", "is_open"])?;
        parse_calendar(&table)
    }

    /// All securities' quotes for one trading day.
    pub fn daily(&self, trade_date: NaiveDate) -> Result<Vec<QuoteRow>, DataError> {
        let mut params = BTreeMap::new();
        params.insert("trade_date", vendor_date(trade_date));
        let table = self.call("daily", &params, DAILY_FIELDS)?;
        parse_quotes(&table)
    }

    /// All securities' limit prices for one trading day.
    pub fn stk_limit(&self, trade_date: NaiveDate) -> Result<Vec<LimitRow>, DataError> {
        let mut params = BTreeMap::new();
        params.insert("trade_date", vendor_date(trade_date));
        let table = self.call("stk_limit", &params, LIMIT_FIELDS)?;
        parse_limits(&table)
    }

    /// Currently listed securities.
    pub fn stock_basic(&self) -> Result<Vec<SecurityInfo>, DataError> {
        let mut params = BTreeMap::new();
        params.insert("list_status", "L".to_string());
        let table = self.call("stock_basic", &params, BASIC_FIELDS)?;
        parse_securities(&table)
    }

    /// Account info for the configured token; fails with `AuthenticationFailed` if rejected.
    pub fn verify_token(&self) -> Result<Vec<BTreeMap<String, String>>, DataError> {
        let mut params = BTreeMap::new();
        params.insert("token", self.settings.token.clone());
        let table = self.call("user", &params, &[])?;
        Ok(table
            .items
            .iter()
            .map(|cells| {
                table
                    .fields
                    .iter()
                    .cloned()
                    .zip(cells.iter().map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }))
                    .collect()
            })
            .collect())
    }
}

impl MarketFeed for TushareClient {
    fn name(&self) -> &str {
        "tushare"
    }

    fn trade_cal(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarRow>, DataError> {
        TushareClient::trade_cal(self, start, end)
    }

    fn daily(&self, trade_date: NaiveDate) -> Result<Vec<QuoteRow>, DataError> {
        TushareClient::daily(self, trade_date)
    }

    fn stk_limit(&self, trade_date: NaiveDate) -> Result<Vec<LimitRow>, DataError> {
        TushareClient::stk_limit(self, trade_date)
    }

    fn stock_basic(&self) -> Result<Vec<SecurityInfo>, DataError> {
        TushareClient::stock_basic(self)
    }

    fn is_available(&self) -> bool {
        TushareClient::is_available(self)
    }
}

fn interpret(api_name: &str, body: ApiResponse) -> Result<ApiTable, DataError> {
    let msg = body.msg.unwrap_or_default();
    match body.code {
        0 => Ok(body.data.unwrap_or_default()),
        CODE_BAD_TOKEN => Err(DataError::AuthenticationFailed(msg)),
        CODE_RATE_LIMITED => Err(DataError::RateLimited(msg)),
        code if msg.contains("token") => {
            debug!(api_name, code, "treating token message as authentication failure");
            Err(DataError::AuthenticationFailed(msg))
        }
        code => Err(DataError::Vendor { code, msg }),
    }
}
