use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, Token, Type, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[entity] 宏实现
/// - 仅支持具名字段结构体
/// - 确保存在字段：`id: IdType`、`version: Version`，并置于最前
/// - 生成 `::eskit_domain::entity::Entity` 实现
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EntityAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[entity] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };

    let id_type = cfg.id_ty.unwrap_or_else(|| syn::parse_quote! { String });
    let version_ty: Type = syn::parse_quote! { ::eskit_domain::value_object::Version };

    // 重建字段顺序：id、version 在前，其余字段保持相对顺序
    let mut new_named: Punctuated<syn::Field, Token![,]> = Punctuated::new();

    let existed_id = fields_named
        .named
        .iter()
        .find(|f| f.ident.as_ref().is_some_and(|i| i == "id"))
        .cloned();
    let existed_version = fields_named
        .named
        .iter()
        .find(|f| f.ident.as_ref().is_some_and(|i| i == "version"))
        .cloned();

    if let Some(f) = existed_id {
        new_named.push(f);
    } else {
        new_named.push(syn::parse_quote! { id: #id_type });
    }

    if let Some(f) = existed_version {
        new_named.push(f);
    } else {
        new_named.push(syn::parse_quote! { version: #version_ty });
    }

    for f in fields_named.named.clone() {
        let is_id_or_version = f
            .ident
            .as_ref()
            .is_some_and(|i| i == "id" || i == "version");
        if !is_id_or_version {
            new_named.push(f);
        }
    }

    fields_named.named = new_named;

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    let out = quote! {
        #st

        impl #impl_generics ::eskit_domain::entity::Entity for #ident #ty_generics #where_clause {
            type Id = #id_type;

            fn new(id: Self::Id) -> Self {
                Self {
                    id,
                    version: ::eskit_domain::value_object::Version::new(),
                    ..Default::default()
                }
            }

            fn id(&self) -> &Self::Id {
                &self.id
            }

            fn version(&self) -> ::eskit_domain::value_object::Version {
                self.version
            }

            fn set_version(&mut self, version: ::eskit_domain::value_object::Version) {
                self.version = version;
            }
        }
    };

    TokenStream::from(out)
}

// 属性配置：`#[entity(id = IdType)]`
struct EntityAttrConfig {
    id_ty: Option<Type>,
}

impl Parse for EntityAttrConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut id_ty: Option<Type> = None;

        if input.is_empty() {
            return Ok(Self { id_ty });
        }

        let pairs: Punctuated<syn::ExprAssign, Token![,]> =
            Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;

        for assign in pairs {
            let key_ident = match *assign.left {
                syn::Expr::Path(p) if p.path.segments.len() == 1 => {
                    p.path.segments[0].ident.clone()
                }
                other => return Err(syn::Error::new(other.span(), "invalid attribute key")),
            };
            match key_ident.to_string().as_str() {
                "id" => {
                    if id_ty.is_some() {
                        return Err(syn::Error::new(
                            key_ident.span(),
                            "duplicate key 'id' in attribute",
                        ));
                    }
                    let ty_parsed: Type = syn::parse2(assign.right.to_token_stream())?;
                    id_ty = Some(ty_parsed);
                }
                _ => {
                    return Err(syn::Error::new(key_ident.span(), "unknown key; expected 'id'"));
                }
            }
        }

        Ok(Self { id_ty })
    }
}
