use crate::config::PollSettings;
use crate::events::ChainEvent;
use crate::registry::Registry;
use crate::repository::{MarketType, TransactionRecord, TransactionStatus, TransactionType};
use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use anyhow::{Result, bail};

/// What happened to one event. Only infrastructure failures are errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Registered(TransactionRecord),
    Duplicate,
    ProjectNotFound,
    InvalidAmount(String),
}

/// Converts a fixed-point integer with `decimals` places to a float.
pub fn decode_amount(raw: U256, decimals: u8) -> Result<f64> {
    let formatted = format_units(raw, decimals)?;
    let value: f64 = formatted.parse()?;
    if !value.is_finite() {
        bail!("{formatted} is not a finite number");
    }
    Ok(value)
}

pub fn register_event<R>(
    registry: &R,
    event: &ChainEvent,
    settings: &PollSettings,
) -> Result<Registration>
where
    R: Registry + ?Sized,
{
    if registry
        .find_by_transaction_hash(&event.transaction_hash)?
        .is_some()
    {
        return Ok(Registration::Duplicate);
    }

    let Some(project) = registry.find_project_by_token_address(&event.project_address)? else {
        return Ok(Registration::ProjectNotFound);
    };

    let amounts = (
        decode_amount(event.token_amount, settings.token_decimals),
        decode_amount(event.total_cost, settings.quote_decimals),
        decode_amount(event.fee, settings.quote_decimals),
        decode_amount(event.price, settings.quote_decimals),
    );
    let (token_amount, wusdt_amount, fees_wusdt, token_price) = match amounts {
        (Ok(amount), Ok(cost), Ok(fee), Ok(price)) => (amount, cost, fee, price),
        (amount, cost, fee, price) => {
            let reason = [
                ("tokenAmount", amount.err()),
                ("totalCost", cost.err()),
                ("fee", fee.err()),
                ("price", price.err()),
            ]
            .into_iter()
            .find_map(|(field, err)| err.map(|e| format!("invalid {field}: {e}")))
            .unwrap_or_default();
            return Ok(Registration::InvalidAmount(reason));
        }
    };

    let record = TransactionRecord {
        id: None,
        transaction_hash: event.transaction_hash,
        project_id: project.id,
        project_token_address: event.project_address,
        user_who_buys: event.buyer,
        token_amount,
        wusdt_amount,
        token_price,
        fees_wusdt,
        status: TransactionStatus::Approved,
        transaction_type: TransactionType::BuyProjectToken,
        market_type: MarketType::Primary,
        receipt_link: format!("{}{:?}", settings.receipt_url_prefix, event.transaction_hash),
        block_number: event.block_number,
        block_timestamp: event.block_timestamp,
    };

    Ok(Registration::Registered(
        registry.insert_transaction_record(record)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SqliteRegistry;
    use crate::repository::{Database, ProjectRepository};
    use alloy_primitives::{Address, B256};

    fn event(hash_byte: u8, project_address: Address) -> ChainEvent {
        ChainEvent {
            transaction_hash: B256::repeat_byte(hash_byte),
            buyer: Address::repeat_byte(1),
            token_amount: U256::from(25_000_000u64),
            total_cost: U256::from(1_500_000u64),
            fee: U256::from(15_000u64),
            price: U256::from(60_000u64),
            project_address,
            block_number: 77,
            block_timestamp: 1_700_000_000,
        }
    }

    fn registry_with_project(token_address: Address) -> SqliteRegistry {
        let registry = SqliteRegistry::new(Database::new(":memory:").unwrap());
        {
            let db = registry.database();
            ProjectRepository::new(&db.conn)
                .insert("Solar Farm", &token_address)
                .unwrap();
        }
        registry
    }

    #[test]
    fn six_decimal_fixed_point_decodes() {
        assert_eq!(decode_amount(U256::from(1_500_000u64), 6).unwrap(), 1.5);
        assert_eq!(decode_amount(U256::ZERO, 6).unwrap(), 0.0);
        assert_eq!(decode_amount(U256::from(42u64), 0).unwrap(), 42.0);
    }

    #[test]
    fn out_of_range_decimals_are_rejected() {
        assert!(decode_amount(U256::from(1u64), 200).is_err());
    }

    #[test]
    fn registers_normalized_record() {
        let project = Address::repeat_byte(2);
        let registry = registry_with_project(project);
        let settings = PollSettings::default();

        let outcome = register_event(&registry, &event(7, project), &settings).unwrap();
        let Registration::Registered(record) = outcome else {
            panic!("expected registration, got {outcome:?}");
        };

        assert_eq!(record.token_amount, 25.0);
        assert_eq!(record.wusdt_amount, 1.5);
        assert_eq!(record.fees_wusdt, 0.015);
        assert_eq!(record.token_price, 0.06);
        assert_eq!(record.status, TransactionStatus::Approved);
        assert_eq!(record.transaction_type, TransactionType::BuyProjectToken);
        assert_eq!(record.market_type, MarketType::Primary);
        assert_eq!(
            record.receipt_link,
            format!("https://polygonscan.com/tx/{:?}", B256::repeat_byte(7))
        );
    }

    #[test]
    fn second_registration_is_a_duplicate() {
        let project = Address::repeat_byte(2);
        let registry = registry_with_project(project);
        let settings = PollSettings::default();

        register_event(&registry, &event(7, project), &settings).unwrap();
        assert_eq!(
            register_event(&registry, &event(7, project), &settings).unwrap(),
            Registration::Duplicate
        );
    }

    #[test]
    fn unknown_project_is_reported() {
        let registry = registry_with_project(Address::repeat_byte(2));
        let outcome =
            register_event(&registry, &event(7, Address::repeat_byte(3)), &PollSettings::default())
                .unwrap();
        assert_eq!(outcome, Registration::ProjectNotFound);
        assert!(
            registry
                .find_by_transaction_hash(&B256::repeat_byte(7))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unusable_decimals_reject_before_persisting() {
        let project = Address::repeat_byte(2);
        let registry = registry_with_project(project);
        let settings = PollSettings {
            quote_decimals: 200,
            ..PollSettings::default()
        };

        let outcome = register_event(&registry, &event(7, project), &settings).unwrap();
        assert!(matches!(outcome, Registration::InvalidAmount(reason) if reason.contains("totalCost")));
        assert!(
            registry
                .find_by_transaction_hash(&B256::repeat_byte(7))
                .unwrap()
                .is_none()
        );
    }
}
