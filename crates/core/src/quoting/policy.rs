use serde::{Deserialize, Serialize};

use crate::domain::equipment::{Equipment, EquipmentFamily, Mount, Variant};
use crate::domain::quote::ServiceType;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePolicyInput {
    pub equipment: Equipment,
    pub mount: Option<Mount>,
    pub burner_count: Option<u8>,
    pub installation: bool,
}

pub trait ServicePolicy: Send + Sync {
    fn service_type(&self, input: &ServicePolicyInput) -> ServiceType;
}

/// Fixed equipment policy table.
#[derive(Clone, Debug, Default)]
pub struct DeterministicServicePolicy;

impl ServicePolicy for DeterministicServicePolicy {
    fn service_type(&self, input: &ServicePolicyInput) -> ServiceType {
        resolve_service_type(input)
    }
}

pub fn resolve_service_type(input: &ServicePolicyInput) -> ServiceType {
    if input.installation {
        return ServiceType::Installation;
    }

    let Equipment { family, variant } = input.equipment;
    match (family, variant) {
        (_, Some(Variant::Industrial)) => ServiceType::PickupForDiagnosis,
        (EquipmentFamily::Stove | EquipmentFamily::Cooktop, _) => ServiceType::OnSiteVisit,
        (EquipmentFamily::Microwave | EquipmentFamily::Oven, Some(Variant::BuiltIn)) => {
            ServiceType::PickupForDiagnosis
        }
        (EquipmentFamily::Microwave | EquipmentFamily::Oven, Some(Variant::Countertop)) => {
            ServiceType::PickupForRepair
        }
        (EquipmentFamily::Microwave | EquipmentFamily::Oven, _) => match input.mount {
            Some(Mount::BuiltIn) => ServiceType::PickupForDiagnosis,
            Some(Mount::Countertop) => ServiceType::PickupForRepair,
            _ => ServiceType::OnSiteVisit,
        },
        _ => ServiceType::OnSiteVisit,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_service_type, DeterministicServicePolicy, ServicePolicy, ServicePolicyInput};
    use crate::domain::equipment::{Equipment, EquipmentFamily, Mount, Variant};
    use crate::domain::quote::ServiceType;

    fn input(family: EquipmentFamily, variant: Option<Variant>) -> ServicePolicyInput {
        ServicePolicyInput {
            equipment: Equipment { family, variant },
            mount: None,
            burner_count: None,
            installation: false,
        }
    }

    #[test]
    fn policy_table_matches_equipment_categories() {
        let cases = [
            (EquipmentFamily::Stove, Some(Variant::Gas), ServiceType::OnSiteVisit),
            (EquipmentFamily::Cooktop, Some(Variant::Induction), ServiceType::OnSiteVisit),
            (EquipmentFamily::Microwave, Some(Variant::BuiltIn), ServiceType::PickupForDiagnosis),
            (EquipmentFamily::Oven, Some(Variant::BuiltIn), ServiceType::PickupForDiagnosis),
            (EquipmentFamily::Microwave, Some(Variant::Countertop), ServiceType::PickupForRepair),
            (EquipmentFamily::Stove, Some(Variant::Industrial), ServiceType::PickupForDiagnosis),
            (EquipmentFamily::Oven, Some(Variant::Industrial), ServiceType::PickupForDiagnosis),
            (EquipmentFamily::Dishwasher, None, ServiceType::OnSiteVisit),
            (EquipmentFamily::Refrigerator, None, ServiceType::OnSiteVisit),
        ];

        for (family, variant, expected) in cases {
            assert_eq!(
                DeterministicServicePolicy.service_type(&input(family, variant)),
                expected,
                "{family:?} {variant:?}"
            );
        }
    }

    #[test]
    fn mount_decides_for_unqualified_microwave() {
        let mut built_in = input(EquipmentFamily::Microwave, None);
        built_in.mount = Some(Mount::BuiltIn);
        assert_eq!(resolve_service_type(&built_in), ServiceType::PickupForDiagnosis);
    }

    #[test]
    fn installation_overrides_equipment_policy() {
        let mut install = input(EquipmentFamily::Oven, Some(Variant::BuiltIn));
        install.installation = true;
        assert_eq!(resolve_service_type(&install), ServiceType::Installation);
    }
}
