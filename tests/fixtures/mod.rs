//! Product submissions used across the API tests

#[derive(Debug, Clone)]
pub struct ProductFixture {
    pub name: &'static str,
    pub price: &'static str,
    pub url: &'static str,
    pub description: Option<&'static str>,
    pub quality: Option<&'static str>,
}

pub const TRAIL_RUNNER: ProductFixture = ProductFixture {
    name: "Trail Runner",
    price: "$89",
    url: "https://shop.example.com/trail-runner",
    description: None,
    quality: Some("fast"),
};

pub const PRODUCTS: &[ProductFixture] = &[
    TRAIL_RUNNER,
    ProductFixture {
        name: "Ceramic Pour-Over Set",
        price: "$42.50",
        url: "https://shop.example.com/pour-over",
        description: Some("Hand-glazed dripper with two cups"),
        quality: Some("balanced"),
    },
    ProductFixture {
        name: "Canvas Weekender",
        price: "€120",
        url: "https://shop.example.com/weekender",
        description: None,
        quality: None,
    },
    ProductFixture {
        name: "Desk Lamp",
        price: "$35",
        url: "https://shop.example.com/lamp",
        description: Some("Warm dimmable LED"),
        quality: Some("HIGH"),
    },
];
