//! Revenue split between the platform and the provider.
//!
//! The policy is an explicit argument at every call site. Nothing infers it
//! from invoice shape; two confirmation paths silently using different math
//! for the same invoice is exactly the failure mode this rules out.

use rust_decimal::Decimal;

/// Platform commission rate, 40%.
fn commission_rate() -> Decimal {
    Decimal::new(40, 2)
}

/// Which split applies, with the figures it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionPolicy {
    /// Appointment invoices with a known fee/transport breakdown: the
    /// platform takes 40% of the consultation fee only; the provider keeps
    /// 60% of the fee plus the full transport surcharge.
    ConsultationFee { fee: Decimal, transport: Decimal },
    /// Everything else (pharmacy, ambulance, manual, unknown breakdown):
    /// 40% of the total to the platform, 60% to the provider.
    TotalAmount { total: Decimal },
}

/// Outcome of a split. `platform_share + provider_share` always equals the
/// amount the policy covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSplit {
    pub platform_share: Decimal,
    pub provider_share: Decimal,
}

/// Compute the split for a paid amount under the given policy.
pub fn split(policy: CommissionPolicy) -> CommissionSplit {
    match policy {
        CommissionPolicy::ConsultationFee { fee, transport } => {
            let platform_share = (fee * commission_rate()).round_dp(2);
            CommissionSplit {
                platform_share,
                provider_share: fee - platform_share + transport,
            }
        }
        CommissionPolicy::TotalAmount { total } => {
            let platform_share = (total * commission_rate()).round_dp(2);
            CommissionSplit {
                platform_share,
                provider_share: total - platform_share,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn consultation_fee_split() {
        let result = split(CommissionPolicy::ConsultationFee {
            fee: dec(1000),
            transport: dec(150),
        });
        assert_eq!(result.platform_share, dec(400));
        assert_eq!(result.provider_share, dec(750));
    }

    #[test]
    fn total_amount_split() {
        let result = split(CommissionPolicy::TotalAmount { total: dec(2000) });
        assert_eq!(result.platform_share, dec(800));
        assert_eq!(result.provider_share, dec(1200));
    }

    #[test]
    fn split_is_exact_after_rounding() {
        // 33.33 * 40% = 13.332, rounds to 13.33; shares must still sum.
        let total = Decimal::new(3333, 2);
        let result = split(CommissionPolicy::TotalAmount { total });
        assert_eq!(result.platform_share + result.provider_share, total);
    }

    #[test]
    fn transport_is_untouched_by_commission() {
        let with_transport = split(CommissionPolicy::ConsultationFee {
            fee: dec(500),
            transport: dec(300),
        });
        let without = split(CommissionPolicy::ConsultationFee {
            fee: dec(500),
            transport: Decimal::ZERO,
        });
        assert_eq!(with_transport.platform_share, without.platform_share);
        assert_eq!(
            with_transport.provider_share - without.provider_share,
            dec(300)
        );
    }
}
