use crate::domain::equipment::{EquipmentFamily, Symptom};

/// Static "possible causes" lookup keyed by equipment family and symptom.
pub fn possible_causes(family: EquipmentFamily, symptom: Symptom) -> Vec<String> {
    use EquipmentFamily as F;
    use Symptom as S;

    let causes: &[&str] = match (family, symptom) {
        (F::Stove | F::Cooktop | F::Oven, S::NoIgnition) => {
            &["clogged burner or injector", "faulty spark igniter", "worn ignition module"]
        }
        (_, S::GasSmell) => {
            &["loose gas connection", "damaged hose or regulator", "worn valve seal"]
        }
        (F::Stove | F::Cooktop, S::Sparking) => {
            &["moisture on the igniter", "cracked spark electrode", "shorted ignition switch"]
        }
        (F::Stove | F::Cooktop, S::NotHeating) => {
            &["burned heating element", "faulty power board", "defective temperature control"]
        }
        (F::Oven, S::NotHeating) => {
            &["burned heating element", "faulty thermostat", "defective thermal fuse"]
        }
        (F::Microwave, S::NotHeating) => {
            &["failed magnetron", "blown high-voltage diode", "faulty capacitor"]
        }
        (F::Microwave, S::Sparking) => {
            &["damaged waveguide cover", "worn cavity paint", "loose stirrer"]
        }
        (F::Microwave | F::Oven, S::Door) => {
            &["misaligned door latch", "broken door switch", "worn door seal"]
        }
        (F::Refrigerator | F::Freezer, S::NotCooling) => {
            &["refrigerant leak", "faulty start relay or compressor", "frozen evaporator fan"]
        }
        (F::Refrigerator | F::Freezer, S::Leaking) => {
            &["blocked defrost drain", "cracked water line", "worn door gasket"]
        }
        (F::Refrigerator | F::Freezer, S::Noise) => {
            &["worn fan motor", "compressor mounting wear", "ice on the fan blades"]
        }
        (F::Refrigerator | F::Freezer, S::Door) => {
            &["worn door gasket", "misaligned hinge", "broken door switch"]
        }
        (F::WashingMachine, S::NotSpinning) => {
            &["worn drive belt", "faulty lid lock", "failed motor capacitor"]
        }
        (F::WashingMachine | F::Dishwasher, S::NotDraining) => {
            &["clogged drain pump filter", "kinked drain hose", "failed drain pump"]
        }
        (F::WashingMachine | F::Dishwasher, S::Leaking) => {
            &["loose hose clamp", "worn door seal", "cracked tub or sump"]
        }
        (F::WashingMachine, S::Noise) => {
            &["worn drum bearings", "unbalanced load", "loose counterweight"]
        }
        (F::Dishwasher, S::NotHeating) => {
            &["burned heating element", "faulty thermostat", "control board failure"]
        }
        (F::Dryer, S::NotHeating) => {
            &["blown thermal fuse", "burned heating element", "clogged vent duct"]
        }
        (F::Dryer, S::NotSpinning) => &["broken drum belt", "worn idler pulley", "failed motor"],
        (F::RangeHood, S::Noise) => {
            &["worn motor bearings", "loose fan blade", "clogged grease filter"]
        }
        (F::RangeHood, S::NotTurningOn) => {
            &["faulty switch panel", "burned motor", "blown internal fuse"]
        }
        (_, S::NotTurningOn) => &["power supply issue", "blown fuse", "control board failure"],
        (_, S::Display) => &["control board failure", "faulty keypad", "loose panel connector"],
        (_, S::Door) => &["misaligned door latch", "worn door seal", "broken door switch"],
        (_, S::Noise) => &["worn motor bearings", "loose internal part", "failing fan"],
        (_, S::Leaking) => &["loose connection", "worn seal", "cracked hose"],
        _ => &["worn internal component", "electrical fault", "a control failure"],
    };

    causes.iter().map(|cause| (*cause).to_owned()).collect()
}
