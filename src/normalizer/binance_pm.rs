//! Binance Portfolio Margin normalizers

use super::{
    composite_id, decimal_field, format_datetime, i64_field, opt_decimal_field, opt_str_field,
    str_field, RecordContext, SchemaNormalizer, SchemaValidationError,
};
use crate::fetcher::RawRecord;
use crate::{DataType, NormalizedRecord, RecordType, Side};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Normalizer for `data_type`
pub fn normalizer(data_type: DataType) -> Box<dyn SchemaNormalizer> {
    match data_type {
        DataType::Trades => Box::new(TradeNormalizer),
        DataType::Funding => Box::new(FundingNormalizer),
        DataType::Deposits => Box::new(DepositNormalizer),
        DataType::Withdrawals => Box::new(WithdrawalNormalizer),
        DataType::Interest => Box::new(InterestNormalizer),
    }
}

/// Parse a withdrawal `applyTime` (`YYYY-MM-DD HH:MM:SS`, UTC) into milliseconds
pub fn parse_apply_time(value: &str) -> Result<i64, SchemaValidationError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| SchemaValidationError::InvalidField {
            field: "applyTime".to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn base_record(
    ctx: &RecordContext<'_>,
    raw: &RawRecord,
    id: String,
    raw_type: RecordType,
    side: Side,
) -> Result<NormalizedRecord, SchemaValidationError> {
    Ok(NormalizedRecord {
        exchange: ctx.exchange.to_string(),
        account: ctx.account.to_string(),
        data_type: ctx.data_type,
        id,
        timestamp: raw.timestamp,
        datetime: format_datetime(raw.timestamp)?,
        symbol: None,
        side,
        price: None,
        quantity: None,
        fee: None,
        fee_currency: None,
        raw_type,
        extra: BTreeMap::new(),
    })
}

fn insert_opt(extra: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        extra.insert(key.to_string(), value);
    }
}

/// Trade fills from `/papi/v1/pm/trade`, keyed `{symbol}:{id}`
#[derive(Debug, Clone, Copy)]
pub struct TradeNormalizer;

impl SchemaNormalizer for TradeNormalizer {
    fn data_type(&self) -> DataType {
        DataType::Trades
    }

    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError> {
        let p = &raw.payload;
        let side = match str_field(p, "side")?.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => {
                return Err(SchemaValidationError::UnknownValue {
                    field: "side".to_string(),
                    value: other.to_string(),
                })
            }
        };

        // Trade ids count up per symbol, so the symbol is part of the key
        let symbol = str_field(p, "symbol")?;
        let id = format!("{symbol}:{}", str_field(p, "id")?);
        let mut record = base_record(ctx, raw, id, RecordType::Trade, side)?;
        record.symbol = Some(symbol);
        record.price = Some(decimal_field(p, "price")?);
        record.quantity = Some(decimal_field(p, "qty")?);
        record.fee = Some(decimal_field(p, "commission")?);
        record.fee_currency = Some(str_field(p, "commissionAsset")?);

        insert_opt(&mut record.extra, "order_id", opt_str_field(p, "orderId")?);
        insert_opt(
            &mut record.extra,
            "order_type",
            opt_str_field(p, "type")?.map(|t| t.to_lowercase()),
        );
        insert_opt(
            &mut record.extra,
            "position_side",
            opt_str_field(p, "positionSide")?.map(|s| s.to_lowercase()),
        );
        insert_opt(&mut record.extra, "realized_pnl", opt_str_field(p, "realizedPnl")?);
        if let Some(maker) = opt_str_field(p, "maker")? {
            let liquidity = match maker.as_str() {
                "true" => "maker",
                "false" => "taker",
                other => {
                    return Err(SchemaValidationError::UnknownValue {
                        field: "maker".to_string(),
                        value: other.to_string(),
                    })
                }
            };
            record.extra.insert("liquidity".to_string(), liquidity.to_string());
        }

        Ok(record)
    }
}

/// Funding fee settlements from `/papi/v1/pm/funding`
///
/// Funding rows carry no native id; the composite key includes the symbol
/// since several positions settle at the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FundingNormalizer;

impl SchemaNormalizer for FundingNormalizer {
    fn data_type(&self) -> DataType {
        DataType::Funding
    }

    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError> {
        let p = &raw.payload;
        let symbol = str_field(p, "symbol")?;
        let fee = decimal_field(p, "fee")?;

        let id = match &raw.native_id {
            Some(id) => id.clone(),
            None => composite_id(raw.timestamp, ctx.account, ctx.data_type, fee, Some(&symbol)),
        };

        let mut record = base_record(ctx, raw, id, RecordType::FundingFee, Side::None)?;
        record.symbol = Some(symbol);
        record.fee = Some(fee);
        record.fee_currency = opt_str_field(p, "asset")?;
        record.quantity = opt_decimal_field(p, "positionSize")?;

        insert_opt(
            &mut record.extra,
            "funding_rate",
            opt_decimal_field(p, "fundingRate")?.map(|r| r.to_string()),
        );
        Ok(record)
    }
}

fn deposit_status(code: i64) -> Result<&'static str, SchemaValidationError> {
    match code {
        0 | 8 => Ok("pending"),
        1 | 6 => Ok("success"),
        2 | 7 => Ok("failed"),
        other => Err(SchemaValidationError::UnknownValue {
            field: "status".to_string(),
            value: other.to_string(),
        }),
    }
}

fn withdrawal_status(code: i64) -> Result<&'static str, SchemaValidationError> {
    match code {
        0 | 2 | 4 => Ok("pending"),
        6 => Ok("success"),
        1 | 3 | 5 => Ok("failed"),
        other => Err(SchemaValidationError::UnknownValue {
            field: "status".to_string(),
            value: other.to_string(),
        }),
    }
}

/// Deposits from `/sapi/v1/capital/deposit/hisrec`
#[derive(Debug, Clone, Copy)]
pub struct DepositNormalizer;

impl SchemaNormalizer for DepositNormalizer {
    fn data_type(&self) -> DataType {
        DataType::Deposits
    }

    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError> {
        let p = &raw.payload;
        let id = match opt_str_field(p, "id")? {
            Some(id) => id,
            None => str_field(p, "txId")?,
        };

        let mut record = base_record(ctx, raw, id, RecordType::Deposit, Side::Deposit)?;
        record.symbol = Some(str_field(p, "coin")?);
        record.quantity = Some(decimal_field(p, "amount")?);

        let status = deposit_status(i64_field(p, "status")?)?;
        record.extra.insert("status".to_string(), status.to_string());
        insert_opt(&mut record.extra, "network", opt_str_field(p, "network")?);
        insert_opt(&mut record.extra, "address", opt_str_field(p, "address")?);
        insert_opt(&mut record.extra, "tx_hash", opt_str_field(p, "txId")?);
        insert_opt(&mut record.extra, "tag", opt_str_field(p, "addressTag")?);
        Ok(record)
    }
}

/// Withdrawals from `/sapi/v1/capital/withdraw/history`
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalNormalizer;

impl SchemaNormalizer for WithdrawalNormalizer {
    fn data_type(&self) -> DataType {
        DataType::Withdrawals
    }

    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError> {
        let p = &raw.payload;
        let coin = str_field(p, "coin")?;

        let mut record = base_record(ctx, raw, str_field(p, "id")?, RecordType::Withdrawal, Side::Withdrawal)?;
        record.quantity = Some(decimal_field(p, "amount")?);
        record.fee = opt_decimal_field(p, "transactionFee")?;
        record.fee_currency = Some(coin.clone());
        record.symbol = Some(coin);

        let status = withdrawal_status(i64_field(p, "status")?)?;
        record.extra.insert("status".to_string(), status.to_string());
        insert_opt(&mut record.extra, "network", opt_str_field(p, "network")?);
        insert_opt(&mut record.extra, "address", opt_str_field(p, "address")?);
        insert_opt(&mut record.extra, "tx_hash", opt_str_field(p, "txId")?);
        if let Some(transfer_type) = opt_str_field(p, "transferType")? {
            // 1 = internal transfer between Binance accounts
            record
                .extra
                .insert("internal_transfer".to_string(), (transfer_type == "1").to_string());
        }
        Ok(record)
    }
}

/// Margin interest from `/papi/v1/portfolio/interest-history`
#[derive(Debug, Clone, Copy)]
pub struct InterestNormalizer;

impl SchemaNormalizer for InterestNormalizer {
    fn data_type(&self) -> DataType {
        DataType::Interest
    }

    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError> {
        let p = &raw.payload;
        let asset = str_field(p, "asset")?;
        let interest = decimal_field(p, "interest")?;

        let interest_type = str_field(p, "type")?;
        let interest_kind = match interest_type.as_str() {
            "PERIODIC" => "periodic",
            "ON_BORROW" => "on_borrow",
            "PERIODIC_CONVERTED" => "periodic_converted",
            "ON_BORROW_CONVERTED" => "on_borrow_converted",
            "PORTFOLIO" => "portfolio",
            other => {
                return Err(SchemaValidationError::UnknownValue {
                    field: "type".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let id = match &raw.native_id {
            Some(id) => id.clone(),
            None => composite_id(raw.timestamp, ctx.account, ctx.data_type, interest, Some(&asset)),
        };

        let mut record = base_record(ctx, raw, id, RecordType::Interest, Side::None)?;
        record.fee = Some(interest);
        record.fee_currency = Some(asset.clone());
        record.symbol = Some(asset);
        record.extra.insert("interest_type".to_string(), interest_kind.to_string());
        insert_opt(
            &mut record.extra,
            "interest_rate",
            opt_decimal_field(p, "interestRate")?.map(|r| r.to_string()),
        );
        insert_opt(&mut record.extra, "raw_asset", opt_str_field(p, "rawAsset")?);
        Ok(record)
    }
}
