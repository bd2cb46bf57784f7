use detnorm::geometry::NormalizedBox;
use proptest::prelude::*;

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn boxes_inside_the_image_always_normalize(
        ((w, h), bbox) in proptest_helpers::arb_image_and_box()
    ) {
        let norm = NormalizedBox::from_pixel(&bbox, w as f64, h as f64);
        prop_assert!(norm.is_ok(), "{:?} in {}x{}: {:?}", bbox, w, h, norm);
        let norm = norm.unwrap();
        prop_assert!(norm.width() > 0.0 && norm.width() <= 1.0);
        prop_assert!(norm.height() > 0.0 && norm.height() <= 1.0);
        prop_assert!((0.0..=1.0).contains(&norm.x_center()));
        prop_assert!((0.0..=1.0).contains(&norm.y_center()));
    }

    #[test]
    fn pixel_roundtrip_stays_within_tolerance(
        ((w, h), bbox) in proptest_helpers::arb_image_and_box()
    ) {
        let norm = NormalizedBox::from_pixel(&bbox, w as f64, h as f64).unwrap();
        let back = norm.to_pixel(w as f64, h as f64);
        let eps = proptest_helpers::EPS_PIXEL;
        prop_assert!((back.xmin - bbox.xmin).abs() < eps);
        prop_assert!((back.ymin - bbox.ymin).abs() < eps);
        prop_assert!((back.xmax - bbox.xmax).abs() < eps);
        prop_assert!((back.ymax - bbox.ymax).abs() < eps);
    }

    #[test]
    fn label_lines_round_trip_through_text(
        ((w, h), bbox) in proptest_helpers::arb_image_and_box()
    ) {
        let norm = NormalizedBox::from_pixel(&bbox, w as f64, h as f64).unwrap();
        let line = norm.to_string();
        let values: Vec<f64> = line
            .split(' ')
            .map(|field| field.parse().expect("float field"))
            .collect();
        prop_assert_eq!(values.len(), 4);
        prop_assert!((values[0] - norm.x_center()).abs() <= 5e-7);
        prop_assert!((values[3] - norm.height()).abs() <= 5e-7);
    }

    #[test]
    fn out_of_range_values_are_rejected(
        cx in -2.0f64..3.0,
        cy in -2.0f64..3.0,
        bw in -1.0f64..2.0,
        bh in -1.0f64..2.0,
    ) {
        if let Ok(norm) = NormalizedBox::new(cx, cy, bw, bh) {
            prop_assert!(norm.x_center() - norm.width() / 2.0 >= -1e-9);
            prop_assert!(norm.x_center() + norm.width() / 2.0 <= 1.0 + 1e-9);
            prop_assert!(norm.y_center() - norm.height() / 2.0 >= -1e-9);
            prop_assert!(norm.y_center() + norm.height() / 2.0 <= 1.0 + 1e-9);
            prop_assert!(norm.width() > 0.0 && norm.height() > 0.0);
        }
    }
}
