//! Property-based round-trip coverage for the configuration record
//! codec (§4.6): arbitrary field values survive a write/read cycle.

use proptest::prelude::*;

use franklin_link::config::{Axis, Extruder, Global, Motor, Temp};

fn arb_motor() -> impl Strategy<Value = Motor> {
    (any::<u8>(), any::<u8>(), any::<u8>(), any::<f32>(), any::<f32>(), any::<f32>()).prop_map(
        |(step_pin, dir_pin, enable_pin, steps_per_mm, max_f_neg, max_f_pos)| Motor {
            step_pin,
            dir_pin,
            enable_pin,
            steps_per_mm,
            max_f_neg,
            max_f_pos,
        },
    )
}

fn arb_temp() -> impl Strategy<Value = Temp> {
    (
        any::<f32>(),
        any::<f32>(),
        any::<f32>(),
        any::<f32>(),
        any::<f32>(),
        any::<f32>(),
        any::<f32>(),
        any::<u8>(),
        any::<u8>(),
    )
        .prop_map(
            |(alpha, beta, core_c, shell_c, transfer, radiation, power, power_pin, thermistor_pin)| Temp {
                alpha,
                beta,
                core_c,
                shell_c,
                transfer,
                radiation,
                power,
                power_pin,
                thermistor_pin,
            },
        )
}

proptest! {
    #[test]
    fn motor_roundtrip(m in arb_motor()) {
        prop_assert_eq!(Motor::read(&m.write()).unwrap(), m);
    }

    #[test]
    fn temp_roundtrip(t in arb_temp()) {
        prop_assert_eq!(Temp::read(&t.write()).unwrap(), t);
    }

    #[test]
    fn axis_roundtrip(motor in arb_motor(), limit_min_pin in any::<u8>(), limit_max_pin in any::<u8>()) {
        let a = Axis { motor, limit_min_pin, limit_max_pin };
        prop_assert_eq!(Axis::read(&a.write()).unwrap(), a);
    }

    #[test]
    fn extruder_roundtrip(
        motor in arb_motor(),
        temp in arb_temp(),
        filament_heat in any::<f32>(),
        nozzle_size in any::<f32>(),
        filament_size in any::<f32>(),
    ) {
        let e = Extruder { motor, temp, filament_heat, nozzle_size, filament_size };
        prop_assert_eq!(Extruder::read(&e.write()).unwrap(), e);
    }

    #[test]
    fn global_roundtrip(
        name in prop::collection::vec(any::<u8>(), 0..16),
        num_axes in any::<u8>(),
        num_extruders in any::<u8>(),
        num_temps in any::<u8>(),
        printer_type in any::<u8>(),
        led_pin in any::<u8>(),
        room_temp in any::<f32>(),
        motor_limit in any::<u32>(),
        temp_limit in any::<u32>(),
    ) {
        let namelen = 16;
        let mut padded_name = name.clone();
        padded_name.resize(namelen, 0);
        let g = Global {
            name: padded_name.clone(),
            num_axes,
            num_extruders,
            num_temps,
            printer_type,
            led_pin,
            room_temp,
            motor_limit,
            temp_limit,
        };
        let wire = g.write(namelen);
        let back = Global::read(namelen, &wire).unwrap();
        prop_assert_eq!(back.name, padded_name);
        prop_assert_eq!(back.num_axes, num_axes);
        prop_assert_eq!(back.num_extruders, num_extruders);
        prop_assert_eq!(back.num_temps, num_temps);
        prop_assert_eq!(back.printer_type, printer_type);
        prop_assert_eq!(back.led_pin, led_pin);
        prop_assert_eq!(back.motor_limit, motor_limit);
        prop_assert_eq!(back.temp_limit, temp_limit);
        // room_temp compared bit-for-bit via to_bits to sidestep NaN != NaN.
        prop_assert_eq!(back.room_temp.to_bits(), room_temp.to_bits());
    }
}
