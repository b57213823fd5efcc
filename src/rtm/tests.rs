use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use num_complex::Complex64;

use super::interface::fresnel_coefficients;
use super::*;
use crate::atmosphere::SimpleIsotropicAtmosphere;
use crate::config::StreamMode;
use crate::emmodel::{Iba, PhaseShape, Prescribed, ScatteringModel};
use crate::microstructure::Microstructure;
use crate::snowpack::Layer;
use crate::substrate::{self, Lambertian, Reflector};

fn medium(ks: f64, ka: f64, eps: Complex64, shape: PhaseShape) -> Arc<dyn ScatteringModel> {
    Arc::new(Prescribed {
        ks,
        ka,
        permittivity: eps,
        shape,
    })
}

fn layer(thickness: f64, temperature: f64, model: Arc<dyn ScatteringModel>) -> Layer {
    Layer::new(thickness, temperature, model).unwrap()
}

fn solver(n_max_stream: usize) -> Dort {
    Dort::new(DortOptions {
        n_max_stream,
        n_azimuth: 32,
        ..Default::default()
    })
    .unwrap()
}

fn tb(dort: &Dort, snowpack: &Snowpack, theta: &[f64], atmosphere: Option<&dyn Atmosphere>) -> PassiveResult {
    let sensor = Sensor::passive(10e9, theta).unwrap();
    dort.solve(snowpack, &sensor, atmosphere)
        .unwrap()
        .into_passive()
        .unwrap()
}

fn backscatter(dort: &Dort, snowpack: &Snowpack, theta: &[f64]) -> ActiveResult {
    let sensor = Sensor::active(5.3e9, theta).unwrap();
    dort.solve(snowpack, &sensor, None)
        .unwrap()
        .into_active()
        .unwrap()
}

fn scattering_stack(temperature: f64) -> Vec<Layer> {
    vec![
        layer(
            0.3,
            temperature,
            medium(2., 0.5, Complex64::new(1.6, 0.01), PhaseShape::Isotropic),
        ),
        layer(
            1.,
            temperature,
            medium(3., 1., Complex64::new(2.2, 0.02), PhaseShape::Rayleigh),
        ),
    ]
}

#[test]
fn isothermal_stack_is_a_black_body() {
    let temperature = 250.;
    let sky = SimpleIsotropicAtmosphere::new(temperature, 0., 1.).unwrap();
    let substrates: [Option<Arc<dyn substrate::Substrate>>; 3] = [
        None,
        Some(Arc::new(
            substrate::Flat::new(Complex64::new(5., 1.), temperature).unwrap(),
        )),
        Some(Arc::new(Lambertian::new(0.4, temperature).unwrap())),
    ];

    for stream_mode in [StreamMode::MostRefringent, StreamMode::Air] {
        let dort = Dort::new(DortOptions {
            n_max_stream: 8,
            n_evanescent_stream: 4,
            n_azimuth: 32,
            stream_mode,
            ..Default::default()
        })
        .unwrap();
        for substrate in &substrates {
            let mut snowpack = Snowpack::new(scattering_stack(temperature)).unwrap();
            if let Some(substrate) = substrate {
                snowpack = snowpack.with_substrate(substrate.clone());
            }
            let result = tb(&dort, &snowpack, &[30., 50.], Some(&sky));
            for &value in result.data() {
                assert_abs_diff_eq!(value, temperature, epsilon = 1e-6);
            }
        }
    }
}

#[test]
fn semi_infinite_absorber_emits_one_minus_fresnel() {
    let eps = Complex64::new(3., 0.);
    let temperature = 250.;
    let snowpack = Snowpack::new(vec![layer(
        f64::INFINITY,
        temperature,
        medium(0., 1., eps, PhaseShape::Isotropic),
    )])
    .unwrap();
    let result = tb(&solver(8), &snowpack, &[40.], None);

    let (rv, rh) = fresnel_coefficients(40f64.to_radians().cos(), Complex64::new(1., 0.), eps);
    assert_relative_eq!(result.tbv()[0], (1. - rv.norm_sqr()) * temperature, max_relative = 1e-12);
    assert_relative_eq!(result.tbh()[0], (1. - rh.norm_sqr()) * temperature, max_relative = 1e-12);
}

#[test]
fn absorbing_slab_over_reflector() {
    let (t_slab, t_ground) = (260., 280.);
    let (ka, thickness) = (2., 0.4);
    let (rv, rh) = (0.3, 0.5);
    let snowpack = Snowpack::new(vec![layer(
        thickness,
        t_slab,
        medium(0., ka, Complex64::new(1., 0.), PhaseShape::Isotropic),
    )])
    .unwrap()
    .with_substrate(Arc::new(Reflector::new(rv, rh, t_ground).unwrap()));

    let result = tb(&solver(8), &snowpack, &[30.], None);
    let t = (-ka * thickness / 30f64.to_radians().cos()).exp();
    for (value, r) in [(result.tbv()[0], rv), (result.tbh()[0], rh)] {
        let expected = t_slab * (1. - t) + t * (r * t_slab * (1. - t) + (1. - r) * t_ground);
        assert_relative_eq!(value, expected, max_relative = 1e-12);
    }
}

#[test]
fn lambertian_backscatter() {
    let albedo = 0.4;
    let snowpack = Snowpack::new(vec![layer(
        1.,
        260.,
        medium(0., 0., Complex64::new(1., 0.), PhaseShape::Isotropic),
    )])
    .unwrap()
    .with_substrate(Arc::new(Lambertian::new(albedo, 270.).unwrap()));

    let theta = [20., 40.];
    let result = backscatter(&solver(4), &snowpack, &theta);
    let mu: Vec<f64> = theta.iter().map(|t: &f64| t.to_radians().cos()).collect();

    use crate::sensor::Polarization::{H, V};
    for (pol, pol_inc) in [(V, V), (H, V), (V, H), (H, H)] {
        let sigma = result.sigma(pol, pol_inc);
        for k in 0..2 {
            assert_relative_eq!(sigma[k], 2. * albedo * mu[k] * mu[k], max_relative = 1e-10);
        }
    }
    let bistatic = result.bistatic_sigma(V, V);
    assert_relative_eq!(bistatic[[0, 1]], 2. * albedo * mu[0] * mu[1], max_relative = 1e-10);
}

#[test]
fn specular_stack_has_no_backscatter() {
    let snowpack = Snowpack::new(vec![layer(
        0.5,
        260.,
        medium(0., 0.3, Complex64::new(1.8, 0.), PhaseShape::Isotropic),
    )])
    .unwrap()
    .with_substrate(Arc::new(
        substrate::Flat::new(Complex64::new(6., 1.), 270.).unwrap(),
    ));
    let result = backscatter(&solver(6), &snowpack, &[35.]);
    for &value in result.data() {
        assert_abs_diff_eq!(value, 0., epsilon = 1e-15);
    }
}

fn rayleigh_over_ground() -> Snowpack {
    Snowpack::new(vec![layer(
        0.5,
        260.,
        medium(2., 0.5, Complex64::new(1.5, 0.001), PhaseShape::Rayleigh),
    )])
    .unwrap()
    .with_substrate(Arc::new(
        substrate::Flat::new(Complex64::new(5., 1.), 270.).unwrap(),
    ))
}

#[test]
fn cross_polarizations_are_reciprocal() {
    let result = backscatter(&solver(6), &rayleigh_over_ground(), &[40.]);
    assert!(result.sigma_vh()[0] > 0.);
    assert_relative_eq!(result.sigma_vh()[0], result.sigma_hv()[0], max_relative = 1e-6);
    assert!(result.sigma_vv()[0] > result.sigma_vh()[0]);
}

#[test]
fn monostatic_limit_is_continuous() {
    // The monostatic entry is computed with secular terms, the neighbouring
    // bistatic entry without
    let result = backscatter(&solver(6), &rayleigh_over_ground(), &[40., 40.0001]);
    let intensity = result.data();
    for p in 0..2 {
        for q in 0..2 {
            assert_relative_eq!(
                intensity[[0, p, 0, q]],
                intensity[[1, p, 0, q]],
                max_relative = 1e-3
            );
        }
    }
}

#[test]
fn thick_layer_matches_semi_infinite() {
    let model = medium(1., 0.5, Complex64::new(1.7, 0.01), PhaseShape::Rayleigh);
    let dort = solver(8);
    let thick = Snowpack::new(vec![layer(50., 255., model.clone())]).unwrap();
    let infinite = Snowpack::new(vec![layer(f64::INFINITY, 255., model)]).unwrap();

    let thick = tb(&dort, &thick, &[45.], None);
    let infinite = tb(&dort, &infinite, &[45.], None);
    assert_relative_eq!(thick.tbv()[0], infinite.tbv()[0], max_relative = 1e-9);
    assert_relative_eq!(thick.tbh()[0], infinite.tbh()[0], max_relative = 1e-9);
}

#[test]
fn weak_scattering_tends_to_the_absorbing_solution() {
    let dort = solver(8);
    let stack = |ks| {
        Snowpack::new(vec![layer(
            0.6,
            250.,
            medium(ks, 0.8, Complex64::new(1.6, 0.005), PhaseShape::Rayleigh),
        )])
        .unwrap()
        .with_substrate(Arc::new(Reflector::new(0.2, 0.4, 275.).unwrap()))
    };
    let absorbing = tb(&dort, &stack(0.), &[50.], None);
    let weak = tb(&dort, &stack(1e-9), &[50.], None);
    assert_abs_diff_eq!(absorbing.tbv()[0], weak.tbv()[0], epsilon = 1e-5);
    assert_abs_diff_eq!(absorbing.tbh()[0], weak.tbh()[0], epsilon = 1e-5);
}

#[test]
fn solving_twice_gives_the_same_result() {
    let dort = solver(8);
    let snowpack = rayleigh_over_ground();
    let sensor = Sensor::passive(19e9, &[55.]).unwrap();
    let first = dort.solve(&snowpack, &sensor, None).unwrap();
    let second = dort.solve(&snowpack, &sensor, None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn stream_modes_agree() {
    let snowpack = Snowpack::new(scattering_stack(260.))
        .unwrap()
        .with_substrate(Arc::new(
            substrate::Flat::new(Complex64::new(5., 1.), 270.).unwrap(),
        ));
    let options = |stream_mode| DortOptions {
        n_max_stream: 16,
        n_evanescent_stream: 8,
        n_azimuth: 32,
        stream_mode,
        ..Default::default()
    };
    let dense = tb(&Dort::new(options(StreamMode::MostRefringent)).unwrap(), &snowpack, &[50.], None);
    let air = tb(&Dort::new(options(StreamMode::Air)).unwrap(), &snowpack, &[50.], None);
    assert_abs_diff_eq!(dense.tbv()[0], air.tbv()[0], epsilon = 0.25);
    assert_abs_diff_eq!(dense.tbh()[0], air.tbh()[0], epsilon = 0.25);
}

#[test]
fn quadrature_converges_below_a_denser_layer() {
    // Streams trapped in the lower layer graze the upper one
    let snowpack = Snowpack::new(vec![
        layer(0.3, 260., medium(2., 0.5, Complex64::new(1.6, 0.), PhaseShape::Isotropic)),
        layer(1., 265., medium(0., 1., Complex64::new(2.2, 0.), PhaseShape::Isotropic)),
    ])
    .unwrap()
    .with_substrate(Arc::new(
        substrate::Flat::new(Complex64::new(5., 1.), 270.).unwrap(),
    ));
    let tbv: Vec<f64> = [24, 32, 64]
        .into_iter()
        .map(|n| tb(&solver(n), &snowpack, &[50.], None).tbv()[0])
        .collect();
    assert_abs_diff_eq!(tbv[1], tbv[2], epsilon = 1e-3);
    assert_abs_diff_eq!(tbv[0], tbv[2], epsilon = 1e-2);
}

fn lossless_over_ground(ka: f64, temperature: f64) -> Snowpack {
    Snowpack::new(vec![layer(
        0.5,
        temperature,
        medium(2., ka, Complex64::new(1.5, 0.), PhaseShape::Rayleigh),
    )])
    .unwrap()
    .with_substrate(Arc::new(
        substrate::Flat::new(Complex64::new(5., 1.), 270.).unwrap(),
    ))
}

#[test]
fn lossless_scattering_layer() {
    let dort = solver(8);
    let sky = SimpleIsotropicAtmosphere::new(270., 0., 1.).unwrap();
    let isothermal = tb(&dort, &lossless_over_ground(0., 270.), &[40.], Some(&sky));
    assert_abs_diff_eq!(isothermal.tbv()[0], 270., epsilon = 1e-6);
    assert_abs_diff_eq!(isothermal.tbh()[0], 270., epsilon = 1e-6);

    // The lossless solution is the limit of weak absorption
    let lossless = tb(&dort, &lossless_over_ground(0., 250.), &[40.], None);
    let weak = tb(&dort, &lossless_over_ground(1e-7, 250.), &[40.], None);
    assert!(lossless.tbv()[0] > 100. && lossless.tbh()[0] < lossless.tbv()[0]);
    assert_abs_diff_eq!(lossless.tbv()[0], weak.tbv()[0], epsilon = 1e-2);
    assert_abs_diff_eq!(lossless.tbh()[0], weak.tbh()[0], epsilon = 1e-2);

    let sigma = backscatter(&dort, &lossless_over_ground(0., 250.), &[40.]);
    assert!(sigma.sigma_vv()[0] > 0. && sigma.sigma_vv()[0].is_finite());
}

#[test]
fn isothermal_field_inside_the_stack() {
    let temperature = 240.;
    let sky = SimpleIsotropicAtmosphere::new(temperature, 0., 1.).unwrap();
    let snowpack = Snowpack::new(scattering_stack(temperature)).unwrap();
    let sensor = Sensor::passive(10e9, &[30.]).unwrap();
    let field = solver(6).thermal_field(&snowpack, &sensor, Some(&sky)).unwrap();

    assert_eq!(field.n_layers(), 2);
    assert_eq!(field.n_columns(), 1);
    for (layer, depth) in [(0, 0.), (0, 0.15), (1, 0.7), (1, 1.)] {
        let (up, down) = field.intensity(layer, depth).unwrap();
        for value in up.iter().chain(down.iter()) {
            assert_abs_diff_eq!(*value, temperature, epsilon = 1e-6);
        }
    }
    assert!(field.intensity(0, 0.5).is_err());
    assert!(field.intensity(2, 0.).is_err());
}

#[test]
fn invalid_options_are_rejected() {
    let err = Dort::new(DortOptions {
        n_max_stream: 0,
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, RtmError::Configuration(_)));
}

fn shs_snowpack() -> Snowpack {
    let snow = |thickness, radius| {
        Layer::snow(
            thickness,
            265.,
            300.,
            Microstructure::StickyHardSpheres {
                radius,
                stickiness: 0.2,
            },
            Arc::new(Iba),
        )
        .unwrap()
    };
    Snowpack::new(vec![snow(0.4, 200e-6), snow(10., 400e-6)]).unwrap()
}

#[test]
fn sticky_hard_sphere_snowpack_is_plausible() {
    let sensor = Sensor::amsre("36V").unwrap();
    let sky = SimpleIsotropicAtmosphere::new(30., 6., 0.9).unwrap();
    let result = solver(16)
        .solve(&shs_snowpack(), &sensor, Some(&sky))
        .unwrap()
        .into_passive()
        .unwrap();
    let tbv = result.tb_channel("36V").unwrap()[0];
    assert!((150. ..265.).contains(&tbv), "TbV = {tbv}");
    assert!(result.tbh()[0] < tbv);
}

#[test]
fn sticky_hard_sphere_snowpack_regression() {
    let sensor = Sensor::amsre("36V").unwrap();
    let sky = SimpleIsotropicAtmosphere::new(30., 6., 0.9).unwrap();
    let result = Dort::default()
        .solve(&shs_snowpack(), &sensor, Some(&sky))
        .unwrap()
        .into_passive()
        .unwrap();
    assert_abs_diff_eq!(result.tb_channel("36V").unwrap()[0], 210.262, epsilon = 1e-2);
}
